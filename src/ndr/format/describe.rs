//! Human-readable rendering of type trees.

use std::collections::HashSet;
use std::fmt::Write;

use super::{Conformance, MemberKind, StringType, TypeDef, TypeId, TypeLibrary};

impl TypeLibrary {
    /// Render the type rooted at `id` as an indented tree.
    ///
    /// Types already printed higher up the current path are shown as a
    /// back-reference (`-> #n`) so cyclic types terminate.
    pub fn describe(&self, id: TypeId) -> String {
        let mut out = String::new();
        let mut path = HashSet::new();
        self.describe_into(id, 0, &mut path, &mut out);
        out
    }

    fn describe_into(&self, id: TypeId, depth: usize, path: &mut HashSet<TypeId>, out: &mut String) {
        let pad = "  ".repeat(depth);
        if !path.insert(id) {
            let _ = writeln!(out, "{pad}-> {id}");
            return;
        }
        match self.get(id) {
            Err(e) => {
                let _ = writeln!(out, "{pad}<{e}>");
            }
            Ok(TypeDef::Scalar(kind)) => {
                let _ = writeln!(out, "{pad}{kind}");
            }
            Ok(TypeDef::Pointer(ptr)) => {
                let _ = writeln!(out, "{pad}{id} {} pointer (flags 0x{:02x})", ptr.kind.name(), ptr.flags.0);
                self.describe_into(ptr.target, depth + 1, path, out);
            }
            Ok(TypeDef::Array(array)) => {
                let count = match array.conformance {
                    Conformance::Constant(n) => format!("{n}"),
                    Conformance::Correlated(c) => {
                        format!("correlated(0x{:02x}, op 0x{:02x}, {:+})", c.kind, c.op, c.offset)
                    }
                };
                let _ = writeln!(
                    out,
                    "{pad}{id} conformant array [{count}] of {}-byte elements",
                    array.element_size
                );
                self.describe_into(array.element, depth + 1, path, out);
            }
            Ok(TypeDef::String(StringType { width, capacity })) => {
                let width = width.size();
                match capacity {
                    Some(cap) => {
                        let _ = writeln!(out, "{pad}{id} fixed string [{cap}] of {width}-byte chars");
                    }
                    None => {
                        let _ = writeln!(out, "{pad}{id} conformant string of {width}-byte chars");
                    }
                }
            }
            Ok(TypeDef::Struct(s)) => {
                let _ = writeln!(
                    out,
                    "{pad}{id} {} (align {}, {} bytes in memory, {} on the wire)",
                    if s.is_flat() { "struct" } else { "pointer struct" },
                    s.alignment,
                    s.memory_size,
                    s.wire_size
                );
                for member in &s.members {
                    let _ = writeln!(out, "{pad}  +{}:", member.memory_offset);
                    let child = match member.kind {
                        MemberKind::Scalar(kind) => {
                            let _ = writeln!(out, "{pad}    {kind}");
                            continue;
                        }
                        MemberKind::Pointer(ptr) | MemberKind::Struct(ptr) => ptr,
                    };
                    self.describe_into(child, depth + 2, path, out);
                }
            }
        }
        path.remove(&id);
    }
}
