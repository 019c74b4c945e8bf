//! The XEP-0115 §5 entity-capabilities verification string: hashing a
//! disco#info result into a short `ver` value that can be cached and
//! compared without re-running service discovery.

use std::fmt;

use base64::engine::general_purpose::STANDARD as base64_std;
use base64::Engine;
use sha1::{Digest, Sha1};
use stanza::{ns, Element};

use crate::form::{DataForm, DataFormType, Field};

#[derive(Debug)]
pub enum Error {
    /// Two extension forms shared the same FORM_TYPE.
    DuplicateFormType(String),
    Form(crate::form::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::DuplicateFormType(ft) => write!(f, "duplicate FORM_TYPE: {}", ft),
            Error::Form(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<crate::form::Error> for Error {
    fn from(e: crate::form::Error) -> Self {
        Error::Form(e)
    }
}

struct Identity {
    category: String,
    type_: String,
    lang: String,
    name: String,
}

fn compute_item(field: &str) -> Vec<u8> {
    let mut bytes = field.as_bytes().to_vec();
    bytes.push(b'<');
    bytes
}

fn compute_items<T>(things: &[T], encode: impl Fn(&T) -> Vec<u8>) -> Vec<u8> {
    let mut accumulator: Vec<Vec<u8>> = things.iter().map(encode).collect();
    accumulator.sort();
    accumulator.into_iter().flatten().collect()
}

fn compute_identities(identities: &[Identity]) -> Vec<u8> {
    compute_items(identities, |identity| {
        let string = format!(
            "{}/{}/{}/{}",
            identity.category, identity.type_, identity.lang, identity.name
        );
        let mut vec = string.into_bytes();
        vec.push(b'<');
        vec
    })
}

fn compute_features(features: &[String]) -> Vec<u8> {
    compute_items(features, |feature| compute_item(feature))
}

/// The FORM_TYPE of one extension form, if it has a single-valued hidden
/// `FORM_TYPE` field. Forms without one are not extension forms in the
/// XEP-0115 sense and are ignored by the caller rather than treated as an
/// error.
fn form_type_of(form: &DataForm) -> Option<&str> {
    let field = form.fields.iter().find(|f| f.var.as_deref() == Some("FORM_TYPE"))?;
    match field.values.as_slice() {
        [single] => Some(single.as_str()),
        _ => None,
    }
}

fn compute_extensions(forms: &[DataForm]) -> Result<Vec<u8>, Error> {
    let mut seen = std::collections::HashSet::new();
    let mut keyed: Vec<(&str, &DataForm)> = Vec::with_capacity(forms.len());
    for form in forms {
        let form_type = match form_type_of(form) {
            Some(form_type) => form_type,
            // XEP-0115 §5.1b step 3.1: "any other data form is ignored".
            None => continue,
        };
        if !seen.insert(form_type) {
            return Err(Error::DuplicateFormType(form_type.to_owned()));
        }
        keyed.push((form_type, form));
    }
    keyed.sort_by(|a, b| a.0.cmp(b.0));

    let mut out = Vec::new();
    for (form_type, form) in keyed {
        out.extend(compute_item(form_type));
        let mut other_fields: Vec<&Field> = form
            .fields
            .iter()
            .filter(|f| f.var.as_deref() != Some("FORM_TYPE"))
            .collect();
        other_fields.sort_by(|a, b| a.var.cmp(&b.var));
        for field in other_fields {
            let var = match &field.var {
                Some(v) => v,
                None => continue,
            };
            out.extend(compute_item(var));
            let mut values = field.values.clone();
            values.sort();
            out.extend(compute_items(&values, |v| compute_item(v)));
        }
    }
    Ok(out)
}

/// Parses the identities, features, and extension forms directly out of a
/// `<query xmlns='http://jabber.org/protocol/disco#info'/>` element and
/// concatenates them per XEP-0115 §5.1b steps 1-8.
pub fn compute_disco(query: &Element) -> Result<Vec<u8>, Error> {
    let identities: Vec<Identity> = query
        .children()
        .filter(|c| c.name() == "identity" && c.ns() == ns::DISCO_INFO)
        .map(|el| Identity {
            category: el.attr("category").unwrap_or("").to_owned(),
            type_: el.attr("type").unwrap_or("").to_owned(),
            lang: el.attr_ns("lang", ns::XML).unwrap_or("").to_owned(),
            name: el.attr("name").unwrap_or("").to_owned(),
        })
        .collect();

    let features: Vec<String> = query
        .children()
        .filter(|c| c.name() == "feature" && c.ns() == ns::DISCO_INFO)
        .filter_map(|el| el.attr("var").map(|v| v.to_owned()))
        .collect();

    let forms: Vec<DataForm> = query
        .children()
        .filter(|c| c.name() == "x" && c.ns() == ns::DATA_FORMS)
        .map(DataForm::parse)
        .collect::<Result<Vec<_>, _>>()?;
    let forms: Vec<DataForm> = forms
        .into_iter()
        .filter(|f| f.type_ == DataFormType::Result_)
        .collect();

    let mut out = Vec::new();
    out.extend(compute_identities(&identities));
    out.extend(compute_features(&features));
    out.extend(compute_extensions(&forms)?);
    Ok(out)
}

/// `base64(SHA1(compute_disco(query)))`, the `ver` attribute value.
pub fn hash_caps(query: &Element) -> Result<String, Error> {
    let data = compute_disco(query)?;
    let digest = Sha1::digest(&data);
    Ok(base64_std.encode(digest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_client_matches_xep_0115_worked_example() {
        let query: Element = r#"<query xmlns='http://jabber.org/protocol/disco#info'
       node='http://psi-im.org#q07IKJEyjvHSyhy//CH0CxmKi8w='>
  <identity category='client' name='Exodus 0.9.1' type='pc'/>
  <feature var='http://jabber.org/protocol/caps'/>
  <feature var='http://jabber.org/protocol/disco#info'/>
  <feature var='http://jabber.org/protocol/disco#items'/>
  <feature var='http://jabber.org/protocol/muc'/>
</query>"#
            .parse()
            .unwrap();
        let s = compute_disco(&query).unwrap();
        let expected = b"client/pc//Exodus 0.9.1<http://jabber.org/protocol/caps<http://jabber.org/protocol/disco#info<http://jabber.org/protocol/disco#items<http://jabber.org/protocol/muc<".to_vec();
        assert_eq!(s, expected);
        assert_eq!(hash_caps(&query).unwrap(), "QgayPKawpkPSDYmwT/WM94uAlu0=");
    }

    #[test]
    fn complex_client_with_extension_form_matches_worked_example() {
        let query: Element = r#"<query xmlns='http://jabber.org/protocol/disco#info'
       node='http://psi-im.org#q07IKJEyjvHSyhy//CH0CxmKi8w='>
  <identity xml:lang='en' category='client' name='Psi 0.11' type='pc'/>
  <identity xml:lang='el' category='client' name='&#x3a8; 0.11' type='pc'/>
  <feature var='http://jabber.org/protocol/caps'/>
  <feature var='http://jabber.org/protocol/disco#info'/>
  <feature var='http://jabber.org/protocol/disco#items'/>
  <feature var='http://jabber.org/protocol/muc'/>
  <x xmlns='jabber:x:data' type='result'>
    <field var='FORM_TYPE' type='hidden'>
      <value>urn:xmpp:dataforms:softwareinfo</value>
    </field>
    <field var='ip_version'>
      <value>ipv4</value>
      <value>ipv6</value>
    </field>
    <field var='os'>
      <value>Mac</value>
    </field>
    <field var='os_version'>
      <value>10.5.1</value>
    </field>
    <field var='software'>
      <value>Psi</value>
    </field>
    <field var='software_version'>
      <value>0.11</value>
    </field>
  </x>
</query>"#
            .parse()
            .unwrap();
        assert_eq!(hash_caps(&query).unwrap(), "q07IKJEyjvHSyhy//CH0CxmKi8w=");
    }

    #[test]
    fn two_forms_sharing_form_type_make_the_hash_undefined() {
        let query: Element = r#"<query xmlns='http://jabber.org/protocol/disco#info'>
  <identity category='client' name='Exodus 0.9.1' type='pc'/>
  <x xmlns='jabber:x:data' type='result'>
    <field var='FORM_TYPE' type='hidden'><value>urn:xmpp:dataforms:softwareinfo</value></field>
    <field var='os'><value>Mac</value></field>
  </x>
  <x xmlns='jabber:x:data' type='result'>
    <field var='FORM_TYPE' type='hidden'><value>urn:xmpp:dataforms:softwareinfo</value></field>
    <field var='os'><value>Linux</value></field>
  </x>
</query>"#
            .parse()
            .unwrap();
        assert!(matches!(compute_disco(&query), Err(Error::DuplicateFormType(_))));
    }

    #[test]
    fn result_form_without_form_type_field_is_ignored_not_fatal() {
        let with_extra_form: Element = r#"<query xmlns='http://jabber.org/protocol/disco#info'
       node='http://psi-im.org#q07IKJEyjvHSyhy//CH0CxmKi8w='>
  <identity category='client' name='Exodus 0.9.1' type='pc'/>
  <feature var='http://jabber.org/protocol/caps'/>
  <feature var='http://jabber.org/protocol/disco#info'/>
  <feature var='http://jabber.org/protocol/disco#items'/>
  <feature var='http://jabber.org/protocol/muc'/>
  <x xmlns='jabber:x:data' type='result'>
    <field var='color'><value>blue</value></field>
  </x>
</query>"#
            .parse()
            .unwrap();
        // Without a FORM_TYPE field this form contributes nothing to the
        // hash input, so it matches the simple-client worked example.
        assert_eq!(hash_caps(&with_extra_form).unwrap(), "QgayPKawpkPSDYmwT/WM94uAlu0=");
    }
}
