//! XEP-0004 data forms and the XEP-0115 entity-capabilities (`ver`) hash
//! built on top of them.

pub mod caps;
pub mod form;

pub use form::{DataForm, DataFormType, Error, Field, FieldOption, FieldType};
