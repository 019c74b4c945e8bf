//! DNS resolution for the connector's first step: SRV lookup of
//! `_xmpp-client._tcp.<domain>` falling back to a plain A/AAAA lookup, or a
//! direct A/AAAA lookup of an explicit host override.

use std::net::SocketAddr;

use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::error::ResolveErrorKind;
use hickory_resolver::TokioAsyncResolver;

use crate::error::ResolverError;

const DEFAULT_XMPP_CLIENT_PORT: u16 = 5222;

fn to_ascii(domain: &str) -> Result<String, ResolverError> {
    idna::domain_to_ascii(domain).map_err(|e| ResolverError::Internal(e.to_string()))
}

fn map_resolve_error(e: hickory_resolver::error::ResolveError) -> ResolverError {
    match e.kind() {
        ResolveErrorKind::NoRecordsFound { .. } => ResolverError::NotFound,
        ResolveErrorKind::Timeout => ResolverError::TemporaryFailure(e.to_string()),
        _ => ResolverError::TemporaryFailure(e.to_string()),
    }
}

async fn resolve_host(
    resolver: &TokioAsyncResolver,
    host: &str,
    port: u16,
) -> Result<Vec<SocketAddr>, ResolverError> {
    let ascii = to_ascii(host)?;
    let lookup = resolver
        .lookup_ip(ascii.as_str())
        .await
        .map_err(map_resolve_error)?;
    let addrs: Vec<SocketAddr> = lookup.iter().map(|ip| SocketAddr::new(ip, port)).collect();
    if addrs.is_empty() {
        return Err(ResolverError::NotFound);
    }
    Ok(addrs)
}

/// One SRV target, already resolved to addresses.
struct SrvTarget {
    priority: u16,
    weight: u16,
    host: String,
    port: u16,
}

async fn resolve_srv(
    resolver: &TokioAsyncResolver,
    domain: &str,
) -> Result<Vec<SrvTarget>, ResolverError> {
    let ascii = to_ascii(domain)?;
    let name = format!("_xmpp-client._tcp.{}", ascii);
    let lookup = resolver.srv_lookup(name).await.map_err(map_resolve_error)?;
    let mut targets: Vec<SrvTarget> = lookup
        .iter()
        .map(|rec| SrvTarget {
            priority: rec.priority(),
            weight: rec.weight(),
            host: rec.target().to_utf8(),
            port: rec.port(),
        })
        .collect();
    // RFC 2782 calls for weighted-random selection within a priority band;
    // here we approximate it deterministically (lowest priority first,
    // highest weight first within a tie), which preserves the fallback
    // ordering the connector actually depends on.
    targets.sort_by(|a, b| a.priority.cmp(&b.priority).then(b.weight.cmp(&a.weight)));
    Ok(targets)
}

/// Resolves the ordered list of addresses the connector should try, in
/// order, for `domain`. If `explicit` is given, it is resolved directly
/// (step 1's "if explicit host given" branch) and SRV is skipped entirely.
pub async fn resolve(
    domain: &str,
    explicit: Option<(&str, u16)>,
) -> Result<Vec<SocketAddr>, ResolverError> {
    let resolver = TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());

    if let Some((host, port)) = explicit {
        return resolve_host(&resolver, host, port).await;
    }

    match resolve_srv(&resolver, domain).await {
        Ok(targets) if !targets.is_empty() => {
            let mut addrs = Vec::new();
            for target in targets {
                match resolve_host(&resolver, &target.host, target.port).await {
                    Ok(mut a) => addrs.append(&mut a),
                    Err(_) => continue,
                }
            }
            if !addrs.is_empty() {
                return Ok(addrs);
            }
            resolve_host(&resolver, domain, DEFAULT_XMPP_CLIENT_PORT).await
        }
        _ => resolve_host(&resolver, domain, DEFAULT_XMPP_CLIENT_PORT).await,
    }
}
