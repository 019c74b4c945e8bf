//! The `<x xmlns='jabber:x:data'/>` data form: parsing, submission, and the
//! `result`-form row shape disco#info extensions use.

use std::collections::HashMap;
use std::fmt;

use stanza::{ns, Element};

#[derive(Debug)]
pub enum Error {
    WrongType(String),
    IllFormedField { var: String, reason: &'static str },
    FormTypeAlreadySet,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::WrongType(t) => write!(f, "unknown data form type: {}", t),
            Error::IllFormedField { var, reason } => {
                write!(f, "ill-formed field '{}': {}", var, reason)
            }
            Error::FormTypeAlreadySet => write!(f, "FORM_TYPE can only be set once"),
        }
    }
}

impl std::error::Error for Error {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormType {
    Form,
    Submit,
    Result_,
    Cancel,
}

impl DataFormType {
    fn as_str(self) -> &'static str {
        match self {
            DataFormType::Form => "form",
            DataFormType::Submit => "submit",
            DataFormType::Result_ => "result",
            DataFormType::Cancel => "cancel",
        }
    }

    fn parse(s: &str) -> Result<DataFormType, Error> {
        match s {
            "form" => Ok(DataFormType::Form),
            "submit" => Ok(DataFormType::Submit),
            "result" => Ok(DataFormType::Result_),
            "cancel" => Ok(DataFormType::Cancel),
            other => Err(Error::WrongType(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Boolean,
    Fixed,
    Hidden,
    JidMulti,
    JidSingle,
    ListMulti,
    ListSingle,
    TextMulti,
    TextPrivate,
    TextSingle,
}

impl FieldType {
    fn as_str(self) -> &'static str {
        match self {
            FieldType::Boolean => "boolean",
            FieldType::Fixed => "fixed",
            FieldType::Hidden => "hidden",
            FieldType::JidMulti => "jid-multi",
            FieldType::JidSingle => "jid-single",
            FieldType::ListMulti => "list-multi",
            FieldType::ListSingle => "list-single",
            FieldType::TextMulti => "text-multi",
            FieldType::TextPrivate => "text-private",
            FieldType::TextSingle => "text-single",
        }
    }

    fn parse(s: &str) -> FieldType {
        match s {
            "boolean" => FieldType::Boolean,
            "fixed" => FieldType::Fixed,
            "hidden" => FieldType::Hidden,
            "jid-multi" => FieldType::JidMulti,
            "jid-single" => FieldType::JidSingle,
            "list-multi" => FieldType::ListMulti,
            "list-single" => FieldType::ListSingle,
            "text-multi" => FieldType::TextMulti,
            "text-private" => FieldType::TextPrivate,
            _ => FieldType::TextSingle,
        }
    }

    /// Whether this type accepts at most one `<value/>`.
    fn is_single_valued(self) -> bool {
        !matches!(
            self,
            FieldType::JidMulti | FieldType::ListMulti | FieldType::TextMulti
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldOption {
    pub label: Option<String>,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub var: Option<String>,
    pub type_: FieldType,
    pub label: Option<String>,
    pub desc: Option<String>,
    pub required: bool,
    pub values: Vec<String>,
    pub options: Vec<FieldOption>,
}

impl Field {
    fn new(var: impl Into<String>, type_: FieldType) -> Field {
        Field {
            var: Some(var.into()),
            type_,
            label: None,
            desc: None,
            required: false,
            values: Vec::new(),
            options: Vec::new(),
        }
    }

    fn parse(element: &Element) -> Result<Option<Field>, Error> {
        let var = match element.attr("var") {
            Some(v) => v.to_owned(),
            None => return Ok(None),
        };
        let type_ = element.attr("type").map(FieldType::parse).unwrap_or(FieldType::TextSingle);
        let label = element.attr("label").map(|s| s.to_owned());
        let desc = element
            .get_child("desc", ns::DATA_FORMS)
            .map(|d| d.text().trim().to_owned());
        let required = element.get_child("required", ns::DATA_FORMS).is_some();
        let values: Vec<String> = element
            .children()
            .filter(|c| c.name() == "value" && c.ns() == ns::DATA_FORMS)
            .map(|v| v.text())
            .collect();
        if type_.is_single_valued() && values.len() > 1 {
            return Err(Error::IllFormedField {
                var,
                reason: "boolean and single-valued fields may carry at most one <value/>",
            });
        }
        let options = element
            .children()
            .filter(|c| c.name() == "option" && c.ns() == ns::DATA_FORMS)
            .map(|opt_el| FieldOption {
                label: opt_el.attr("label").map(|s| s.to_owned()),
                value: opt_el
                    .get_child("value", ns::DATA_FORMS)
                    .map(|v| v.text())
                    .unwrap_or_default(),
            })
            .collect();
        Ok(Some(Field {
            var: Some(var),
            type_,
            label,
            desc,
            required,
            values,
            options,
        }))
    }

    fn to_element(&self) -> Element {
        let mut el = Element::new("field", ns::DATA_FORMS);
        if let Some(var) = &self.var {
            el.set_attr("var", var.clone());
        }
        el.set_attr("type", self.type_.as_str());
        if let Some(label) = &self.label {
            el.set_attr("label", label.clone());
        }
        if self.required {
            el.append_child(Element::new("required", ns::DATA_FORMS));
        }
        for value in &self.values {
            let mut value_el = Element::new("value", ns::DATA_FORMS);
            value_el.set_text(value.clone());
            el.append_child(value_el);
        }
        el
    }

    /// The `<value/>` texts to emit for a submission, applying the
    /// boolean `"0"`/`"1"` convention.
    fn submit_values(&self) -> Vec<String> {
        if self.type_ == FieldType::Boolean {
            let truthy = self
                .values
                .first()
                .map(|v| v == "1" || v == "true")
                .unwrap_or(false);
            vec![if truthy { "1".to_owned() } else { "0".to_owned() }]
        } else {
            self.values.clone()
        }
    }
}

/// A parsed or in-construction `<x xmlns='jabber:x:data'/>`.
#[derive(Debug, Clone)]
pub struct DataForm {
    pub type_: DataFormType,
    pub title: Option<String>,
    pub instructions: Vec<String>,
    pub fields: Vec<Field>,
    pub form_type: Option<String>,
    pub reported: Vec<Field>,
    pub items: Vec<Vec<Field>>,
}

impl DataForm {
    /// An empty form of the given type, with no FORM_TYPE set yet. Used for
    /// blind submission: call [`set_type`](Self::set_type) then
    /// [`set_field_value`](Self::set_field_value) for each field to send.
    pub fn blank(type_: DataFormType) -> DataForm {
        DataForm {
            type_,
            title: None,
            instructions: Vec::new(),
            fields: Vec::new(),
            form_type: None,
            reported: Vec::new(),
            items: Vec::new(),
        }
    }

    pub fn parse(element: &Element) -> Result<DataForm, Error> {
        if element.name() != "x" || element.ns() != ns::DATA_FORMS {
            return Err(Error::WrongType(element.name().to_owned()));
        }
        let type_ = DataFormType::parse(element.attr("type").unwrap_or(""))?;
        let title = element
            .get_child("title", ns::DATA_FORMS)
            .map(|t| t.text());
        let instructions = element
            .children()
            .filter(|c| c.name() == "instructions" && c.ns() == ns::DATA_FORMS)
            .map(|i| i.text())
            .collect();

        let mut fields = Vec::new();
        let mut form_type = None;
        for field_el in element
            .children()
            .filter(|c| c.name() == "field" && c.ns() == ns::DATA_FORMS)
        {
            if let Some(field) = Field::parse(field_el)? {
                if field.var.as_deref() == Some("FORM_TYPE") {
                    form_type = field.values.first().cloned();
                }
                fields.push(field);
            }
        }

        let reported = element
            .get_child("reported", ns::DATA_FORMS)
            .map(|r| {
                r.children()
                    .filter(|c| c.name() == "field" && c.ns() == ns::DATA_FORMS)
                    .filter_map(|f| Field::parse(f).ok().flatten())
                    .collect()
            })
            .unwrap_or_default();

        let items: Vec<Vec<Field>> = element
            .children()
            .filter(|c| c.name() == "item" && c.ns() == ns::DATA_FORMS)
            .map(|item_el| {
                item_el
                    .children()
                    .filter(|c| c.name() == "field" && c.ns() == ns::DATA_FORMS)
                    .filter_map(|f| Field::parse(f).ok().flatten())
                    .collect()
            })
            .collect();

        Ok(DataForm {
            type_,
            title,
            instructions,
            fields,
            form_type,
            reported,
            items,
        })
    }

    /// Sets this form's FORM_TYPE, for blind submission. Fails if it was
    /// already set, either by parsing or by an earlier call.
    pub fn set_type(&mut self, form_type: impl Into<String>) -> Result<(), Error> {
        if self.form_type.is_some() {
            return Err(Error::FormTypeAlreadySet);
        }
        let form_type = form_type.into();
        self.form_type = Some(form_type.clone());
        let mut field = Field::new("FORM_TYPE", FieldType::Hidden);
        field.values = vec![form_type];
        self.fields.insert(0, field);
        Ok(())
    }

    /// Sets (and type-tags) the value(s) of the field named `var`. With
    /// `create_if_missing`, a field not already present is appended rather
    /// than erroring, matching the blind-submission flow.
    pub fn set_field_value(
        &mut self,
        var: &str,
        type_: FieldType,
        values: Vec<String>,
        create_if_missing: bool,
    ) -> Result<(), Error> {
        if type_.is_single_valued() && values.len() > 1 {
            return Err(Error::IllFormedField {
                var: var.to_owned(),
                reason: "boolean and single-valued fields may carry at most one value",
            });
        }
        if let Some(field) = self.fields.iter_mut().find(|f| f.var.as_deref() == Some(var)) {
            field.values = values;
            return Ok(());
        }
        if !create_if_missing {
            return Err(Error::IllFormedField {
                var: var.to_owned(),
                reason: "no such field, and create_if_missing was not set",
            });
        }
        let mut field = Field::new(var, type_);
        field.values = values;
        self.fields.push(field);
        Ok(())
    }

    /// Builds the `<x type='submit'>` carrying one `<field var=…>` for every
    /// field with a current value (FORM_TYPE included, if set).
    pub fn to_submit_element(&self) -> Element {
        let mut x = Element::new("x", ns::DATA_FORMS);
        x.set_attr("type", DataFormType::Submit.as_str());
        for field in &self.fields {
            if field.values.is_empty() {
                continue;
            }
            let mut field_el = Element::new("field", ns::DATA_FORMS);
            if let Some(var) = &field.var {
                field_el.set_attr("var", var.clone());
            }
            for value in field.submit_values() {
                let mut value_el = Element::new("value", ns::DATA_FORMS);
                value_el.set_text(value);
                field_el.append_child(value_el);
            }
            x.append_child(field_el);
        }
        x
    }

    /// Full `<x type='…'>` rendering (used to round-trip a form, as opposed
    /// to [`to_submit_element`](Self::to_submit_element)'s stripped-down
    /// submission shape).
    pub fn to_element(&self) -> Element {
        let mut x = Element::new("x", ns::DATA_FORMS);
        x.set_attr("type", self.type_.as_str());
        if let Some(title) = &self.title {
            let mut title_el = Element::new("title", ns::DATA_FORMS);
            title_el.set_text(title.clone());
            x.append_child(title_el);
        }
        for instructions in &self.instructions {
            let mut el = Element::new("instructions", ns::DATA_FORMS);
            el.set_text(instructions.clone());
            x.append_child(el);
        }
        for field in &self.fields {
            x.append_child(field.to_element());
        }
        x
    }

    /// The non-FORM_TYPE fields, in document order.
    pub fn fields_excluding_form_type(&self) -> impl Iterator<Item = &Field> {
        self.fields
            .iter()
            .filter(|f| f.var.as_deref() != Some("FORM_TYPE"))
    }
}

/// Used by callers that need a `var -> values` view for building a submitted
/// form from scratch, e.g. a UI layer.
pub fn values_map(fields: &[Field]) -> HashMap<String, Vec<String>> {
    fields
        .iter()
        .filter_map(|f| f.var.clone().map(|v| (v, f.values.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(xml: &str) -> DataForm {
        let el: Element = xml.parse().unwrap();
        DataForm::parse(&el).unwrap()
    }

    #[test]
    fn parses_form_with_defaults_and_options() {
        let form = parse(
            "<x xmlns='jabber:x:data' type='form'>\
               <title>Bot Config</title>\
               <field var='botname'><value>mybot</value></field>\
               <field var='features' type='list-multi'>\
                 <option label='Ping'><value>ping</value></option>\
                 <option label='Time'><value>time</value></option>\
               </field>\
             </x>",
        );
        assert_eq!(form.type_, DataFormType::Form);
        assert_eq!(form.title.as_deref(), Some("Bot Config"));
        let botname = form.fields.iter().find(|f| f.var.as_deref() == Some("botname")).unwrap();
        assert_eq!(botname.type_, FieldType::TextSingle);
        assert_eq!(botname.values, vec!["mybot".to_owned()]);
        let features = form.fields.iter().find(|f| f.var.as_deref() == Some("features")).unwrap();
        assert_eq!(features.options.len(), 2);
    }

    #[test]
    fn rejects_multiple_values_on_boolean_field() {
        let el: Element =
            "<x xmlns='jabber:x:data' type='form'><field var='b' type='boolean'><value>0</value><value>1</value></field></x>"
                .parse()
                .unwrap();
        let err = DataForm::parse(&el).unwrap_err();
        assert!(matches!(err, Error::IllFormedField { .. }));
    }

    #[test]
    fn submit_emits_boolean_as_0_or_1() {
        let mut form = DataForm::blank(DataFormType::Form);
        form.set_type("urn:xmpp:dataforms:softwareinfo").unwrap();
        form.set_field_value("needs-lunch", FieldType::Boolean, vec!["true".to_owned()], true)
            .unwrap();
        let submit = form.to_submit_element();
        let field = submit.get_child("field", ns::DATA_FORMS);
        // FORM_TYPE is first; grab the second field for needs-lunch.
        let lunch_field = submit
            .children()
            .find(|f| f.attr("var") == Some("needs-lunch"))
            .unwrap();
        let value = lunch_field.get_child("value", ns::DATA_FORMS).unwrap();
        assert_eq!(value.text(), "1");
        assert!(field.is_some());
    }

    #[test]
    fn parses_result_form_with_reported_and_items() {
        let form = parse(
            "<x xmlns='jabber:x:data' type='result'>\
               <reported><field var='name' type='text-single'/><field var='jid' type='jid-single'/></reported>\
               <item><field var='name'><value>Juliet</value></field><field var='jid'><value>juliet@example.com</value></field></item>\
               <item><field var='name'><value>Romeo</value></field><field var='jid'><value>romeo@example.net</value></field></item>\
             </x>",
        );
        assert_eq!(form.reported.len(), 2);
        assert_eq!(form.items.len(), 2);
        assert_eq!(form.items[0][0].values, vec!["Juliet".to_owned()]);
    }
}
