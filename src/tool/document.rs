//! JSON value documents: a root value plus the heap its pointers refer to.
//!
//! ```json
//! {
//!   "heap": [{ "long": 7 }, null],
//!   "root": { "pointer": 0 }
//! }
//! ```
//!
//! Heap entries are addressed by index; `null` marks a freed slot.

use serde::{Deserialize, Serialize};

use crate::ndr::{Heap, MarshalError, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub heap: Vec<Option<Value>>,
    pub root: Value,
}

impl Document {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// A heap holding this document's entries at their indices.
    pub fn to_heap(&self) -> Heap<'static> {
        Heap::from_snapshot(self.heap.clone())
    }

    /// Capture a root value and every heap slot, decoding wire views.
    pub fn capture(root: Value, heap: &Heap<'_>) -> Result<Self, MarshalError> {
        Ok(Self {
            heap: heap.snapshot()?,
            root,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ndr::Addr;

    #[test]
    fn test_document_json_shape() {
        let doc = Document::from_json(
            r#"{ "heap": [{ "long": 7 }, null, { "string": [104, 105, 0] }], "root": { "pointer": 0 } }"#,
        )
        .unwrap();
        assert_eq!(doc.root, Value::Pointer(Some(Addr::from_index(0))));

        let heap = doc.to_heap();
        assert_eq!(heap.get(Addr::from_index(0)), Some(&Value::Long(7)));
        assert!(!heap.is_live(Addr::from_index(1)));
        assert_eq!(heap.get(Addr::from_index(2)), Some(&Value::c_string("hi")));

        let again = Document::capture(doc.root.clone(), &heap).unwrap();
        assert_eq!(again, doc);
    }

    #[test]
    fn test_null_pointer_round_trips() {
        let doc = Document {
            heap: Vec::new(),
            root: Value::Pointer(None),
        };
        let text = doc.to_json().unwrap();
        assert!(text.contains("\"pointer\": null"));
        assert_eq!(Document::from_json(&text).unwrap(), doc);
    }
}
