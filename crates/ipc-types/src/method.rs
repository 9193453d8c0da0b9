//! Stub method tables (spec §3 `MethodMetadata`, §4.8).

use crate::guid::fnv1a32;

/// One entry in a stub's method table. Tables are contiguous and indexed
/// directly by `method_id`; lookups are bounds-checked only (see
/// [`MethodTable::find`]).
#[derive(Debug, Clone, Copy)]
pub struct MethodMetadata {
    pub method_id: u16,
    pub method_name: &'static str,
    pub method_hash: u32,
}

/// A stub's append-only method table, indexed directly by `method_id`.
///
/// Method tables are append-only between interface versions: old method ids
/// keep working after new ones are added at the end, because dispatch never
/// does more than a bounds check followed by a direct index.
pub struct MethodTable {
    entries: Vec<MethodMetadata>,
}

impl MethodTable {
    /// Build a table from `(method_id, method_name)` pairs, computing each
    /// entry's `method_hash`. `method_id`s must equal their index (the
    /// contiguous-table invariant `IStubBase::FindMethod` relies on).
    pub fn new(methods: &[(u16, &'static str)]) -> Self {
        let entries = methods
            .iter()
            .enumerate()
            .map(|(i, &(method_id, method_name))| {
                debug_assert_eq!(
                    method_id, i as u16,
                    "method table must be contiguous and ordered by method_id"
                );
                MethodMetadata { method_id, method_name, method_hash: fnv1a32(method_name.as_bytes()) }
            })
            .collect();
        MethodTable { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bounds-checked lookup by `method_id`. Returns `None` if the id is
    /// outside the table, never panics.
    pub fn find(&self, method_id: u16) -> Option<&MethodMetadata> {
        self.entries.get(method_id as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_returns_entry_for_in_range_id() {
        let table = MethodTable::new(&[(0, "Ping"), (1, "Pong")]);
        let entry = table.find(1).unwrap();
        assert_eq!(entry.method_name, "Pong");
        assert_eq!(entry.method_hash, fnv1a32(b"Pong"));
    }

    #[test]
    fn find_is_bounds_checked_not_panicking() {
        let table = MethodTable::new(&[(0, "Ping")]);
        assert!(table.find(5).is_none());
    }

    #[test]
    fn appending_a_method_preserves_old_ids() {
        let v1 = MethodTable::new(&[(0, "Ping")]);
        let v2 = MethodTable::new(&[(0, "Ping"), (1, "NewMethod")]);
        assert_eq!(v1.find(0).unwrap().method_name, v2.find(0).unwrap().method_name);
        assert!(v1.find(1).is_none());
        assert!(v2.find(1).is_some());
    }
}
