//! Property-set XML bodies carried in NOTIFY requests.

use xmltree::{Element, XMLNode};

use crate::error::WireError;

const PROPERTYSET_HEADER: &str =
    "<e:propertyset xmlns:e=\"urn:schemas-upnp-org:event-1-0\">\n";
const PROPERTYSET_FOOTER: &str = "</e:propertyset>\n\n";

/// One changed state variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    /// State variable name, used verbatim as the XML element name
    pub name: String,
    /// State variable value
    pub value: String,
}

/// An ordered set of changed state variables.
///
/// Renders to and parses from the GENA property-set document:
///
/// ```xml
/// <e:propertyset xmlns:e="urn:schemas-upnp-org:event-1-0">
///   <e:property><Volume>42</Volume></e:property>
/// </e:propertyset>
/// ```
///
/// No XML declaration is emitted; several UPnP stacks in the field reject
/// bodies that carry one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertySet {
    properties: Vec<Property>,
}

impl PropertySet {
    /// Create an empty property set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a property set from name/value pairs.
    pub fn from_pairs<I, S, T>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, T)>,
        S: Into<String>,
        T: Into<String>,
    {
        Self {
            properties: pairs
                .into_iter()
                .map(|(name, value)| Property {
                    name: name.into(),
                    value: value.into(),
                })
                .collect(),
        }
    }

    /// Append one changed variable.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.properties.push(Property {
            name: name.into(),
            value: value.into(),
        });
    }

    /// The changed variables in document order.
    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    /// Render the property-set document.
    pub fn to_xml(&self) -> String {
        let mut out = String::from(PROPERTYSET_HEADER);
        for prop in &self.properties {
            out.push_str("<e:property>\n");
            out.push('<');
            out.push_str(&prop.name);
            out.push('>');
            out.push_str(&escape_text(&prop.value));
            out.push_str("</");
            out.push_str(&prop.name);
            out.push_str(">\n</e:property>\n");
        }
        out.push_str(PROPERTYSET_FOOTER);
        out
    }

    /// Parse a NOTIFY body into a property set.
    ///
    /// Accepts any namespace prefix on the propertyset/property elements and
    /// collects one name/value pair per variable element, in document order.
    /// Empty and non-XML input is rejected.
    pub fn parse(body: &str) -> Result<Self, WireError> {
        if body.trim().is_empty() {
            return Err(WireError::InvalidPropertySet("empty body".to_string()));
        }
        let root = Element::parse(body.as_bytes())
            .map_err(|e| WireError::InvalidPropertySet(e.to_string()))?;
        if root.name != "propertyset" {
            return Err(WireError::InvalidPropertySet(format!(
                "unexpected root element <{}>",
                root.name
            )));
        }

        let mut properties = Vec::new();
        for node in &root.children {
            let Some(property) = node.as_element().filter(|e| e.name == "property") else {
                continue;
            };
            for child in &property.children {
                if let XMLNode::Element(var) = child {
                    properties.push(Property {
                        name: var.name.clone(),
                        value: var.get_text().map(|t| t.into_owned()).unwrap_or_default(),
                    });
                }
            }
        }
        Ok(Self { properties })
    }
}

fn escape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}
