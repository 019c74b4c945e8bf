//! A small DOM restricted to the XMPP stanza profile, built on top of
//! `rxml`.
//!
//! This crate provides [`Element`], a tree type shaped for stream-level XML
//! (qualified names, namespaced attributes, ordered text/element children,
//! and a builder DSL for assembling them), [`Stanza`], a thin view deriving
//! the `message`/`presence`/`iq` kind and sub-kind XMPP dispatch code cares
//! about, and conversions to and from `rxml` events for wire I/O.

pub mod convenience;
pub mod element;
pub mod ns;
pub mod stanza;
pub mod xml;

pub use convenience::{iq_error, iq_result, stanza_error_to_node, Condition, ErrorType, StanzaError};
pub use element::{Attribute, Builder, Built, Element, Node};
pub use stanza::{Kind, Stanza, SubKind};
