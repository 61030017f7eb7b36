//! Variable catalog: the dense, 0-based index space over canonical variable
//! names that the snapshot region and wire codec both address by.
//!
//! The catalog itself never knows what the 361 canonical names are or what
//! they mean — it is handed a list of `(name, group, range)` tuples at
//! startup and only ever does name <-> index <-> byte-offset bookkeeping
//! after that. Everything downstream (codec, snapshot store, payload
//! builder) addresses variables through a `VariableRef` obtained here.

use std::collections::HashMap;

use bridge_protocol::{LayoutDescriptor, LayoutVariable, VariableGroup};

use crate::errors::CatalogError;
use crate::hash::fnv1a64;

/// Size in bytes of the snapshot header that precedes the flat `f64` array
/// in the shared snapshot region. Kept 8-byte aligned so `array_base_offset
/// + index * 8` always lands on a double-word boundary.
pub const HEADER_SIZE_BYTES: u32 = 24;

pub const STRIDE_BYTES: u32 = 8;

pub const LAYOUT_VERSION: u32 = 1;

/// A resolved handle to one catalog entry. Cheap to copy, holds no borrow
/// into the catalog so it can be stashed in a `CommandRecord` translation
/// or passed across the snapshot write boundary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VariableRef {
    pub index: u32,
    pub group: VariableGroup,
    pub storage_offset: u32,
    pub range: Option<(f64, f64)>,
}

/// Scans the name table for `{base}.x` / `{base}.y` / `{base}.z` triples
/// (or pairs) and registers `base` under its own FNV-1a id so a single
/// `Vector2`/`Vector3` wire record addressing `base` can resolve straight
/// to the component indices, without `base` itself needing a catalog slot.
fn derive_vector_bases(by_name: &HashMap<String, u32>) -> HashMap<u64, Vec<u32>> {
    let mut bases: HashMap<&str, Vec<u32>> = HashMap::new();
    for name in by_name.keys() {
        let Some(base) = name.strip_suffix(".x") else { continue };
        let mut components = vec![by_name[name]];
        if let Some(&y) = by_name.get(&format!("{base}.y")) {
            components.push(y);
        } else {
            continue;
        }
        if let Some(&z) = by_name.get(&format!("{base}.z")) {
            components.push(z);
        }
        bases.insert(base, components);
    }
    bases.into_iter().map(|(base, indices)| (fnv1a64(base), indices)).collect()
}

struct CatalogEntry {
    canonical_name: String,
    group: VariableGroup,
    range: Option<(f64, f64)>,
}

/// Immutable, built-once lookup table from canonical variable name to
/// dense index and byte offset within the snapshot's scalar array.
pub struct VariableCatalog {
    entries: Vec<CatalogEntry>,
    by_name: HashMap<String, u32>,
    by_id: HashMap<u64, u32>,
    vector_bases: HashMap<u64, Vec<u32>>,
}

impl VariableCatalog {
    /// Builds a catalog from an ordered list of `(name, group, range)`
    /// tuples. Order determines index assignment: the Nth tuple becomes
    /// catalog index N. Rejects duplicate canonical names.
    pub fn build(
        specs: &[(&str, VariableGroup, Option<(f64, f64)>)],
    ) -> Result<Self, CatalogError> {
        let mut entries = Vec::with_capacity(specs.len());
        let mut by_name = HashMap::with_capacity(specs.len());
        let mut by_id = HashMap::with_capacity(specs.len());
        for (idx, (name, group, range)) in specs.iter().enumerate() {
            let index = u32::try_from(idx).map_err(|_| CatalogError::OutOfRange(u32::MAX))?;
            if by_name.insert((*name).to_owned(), index).is_some() {
                return Err(CatalogError::DuplicateName((*name).to_owned()));
            }
            by_id.insert(fnv1a64(name), index);
            entries.push(CatalogEntry {
                canonical_name: (*name).to_owned(),
                group: *group,
                range: *range,
            });
        }
        let vector_bases = derive_vector_bases(&by_name);
        Ok(Self { entries, by_name, by_id, vector_bases })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolves a canonical name to its catalog entry. The only lookup path
    /// exposed to code outside this module — nothing here exposes
    /// `by_name` directly since the map is an implementation detail of the
    /// name -> index step.
    pub fn resolve_by_name(&self, name: &str) -> Result<VariableRef, CatalogError> {
        let index = *self
            .by_name
            .get(name)
            .ok_or_else(|| CatalogError::Unknown(name.to_owned()))?;
        self.resolve_by_index(index)
    }

    /// Resolves a record id from the binary host-facing wire format back to
    /// a catalog entry. Ids are the FNV-1a hash of the canonical name,
    /// precomputed once at catalog build time rather than per-tick.
    pub fn resolve_by_id(&self, id: u64) -> Result<VariableRef, CatalogError> {
        let index = *self
            .by_id
            .get(&id)
            .ok_or_else(|| CatalogError::Unknown(format!("id:{id:016x}")))?;
        self.resolve_by_index(index)
    }

    pub fn resolve_by_index(&self, index: u32) -> Result<VariableRef, CatalogError> {
        let entry = self
            .entries
            .get(index as usize)
            .ok_or(CatalogError::OutOfRange(index))?;
        Ok(VariableRef {
            index,
            group: entry.group,
            storage_offset: HEADER_SIZE_BYTES + index * STRIDE_BYTES,
            range: entry.range,
        })
    }

    /// Resolves a canonical name to the scalar slot a command or a plain
    /// `F64` telemetry record can address directly. Fails with
    /// `TypeMismatch` when `name` names a vector base (registered via the
    /// `.x`/`.y`/`.z` suffix convention) rather than an individually
    /// catalogued scalar — a vector base has no `storage_offset` of its
    /// own, only its components do, so addressing one directly would write
    /// through a nonsensical offset.
    pub fn resolve_scalar(&self, name: &str) -> Result<VariableRef, CatalogError> {
        if self.vector_bases.contains_key(&fnv1a64(name)) {
            return Err(CatalogError::TypeMismatch(name.to_owned()));
        }
        self.resolve_by_name(name)
    }

    /// Resolves a multi-component vector variable via the `{base}.x`,
    /// `{base}.y`, `{base}.z` naming convention. Host-side vector telemetry
    /// (position, velocity, attitude-rate triples) decodes down to 2 or 3
    /// independently catalogued scalar entries rather than one multi-slot
    /// entry, which keeps `offset == array_base_offset + index * 8` true
    /// for every catalog entry without exception.
    pub fn resolve_vector_components(
        &self,
        base_name: &str,
        component_count: u8,
    ) -> Result<Vec<VariableRef>, CatalogError> {
        const SUFFIXES: [&str; 3] = ["x", "y", "z"];
        let n = usize::from(component_count).min(SUFFIXES.len());
        SUFFIXES[..n]
            .iter()
            .map(|suffix| self.resolve_by_name(&format!("{base_name}.{suffix}")))
            .collect()
    }

    /// Resolves a vector wire record's base-name id to its component
    /// `VariableRef`s, in `.x`, `.y`[, `.z`] order.
    pub fn resolve_vector_by_id(&self, id: u64) -> Result<Vec<VariableRef>, CatalogError> {
        let indices = self
            .vector_bases
            .get(&id)
            .ok_or_else(|| CatalogError::Unknown(format!("vector id:{id:016x}")))?;
        indices.iter().map(|&idx| self.resolve_by_index(idx)).collect()
    }

    pub fn canonical_name(&self, index: u32) -> Option<&str> {
        self.entries.get(index as usize).map(|e| e.canonical_name.as_str())
    }

    /// Emits the machine-readable layout descriptor written to the shared
    /// region at startup so non-native readers can locate every field
    /// without linking against this crate.
    pub fn layout_descriptor(&self) -> LayoutDescriptor {
        let variables = self
            .entries
            .iter()
            .enumerate()
            .map(|(idx, entry)| {
                let index = idx as u32;
                LayoutVariable {
                    index,
                    name: entry.canonical_name.clone(),
                    group: entry.group,
                    offset: HEADER_SIZE_BYTES + index * STRIDE_BYTES,
                }
            })
            .collect();
        LayoutDescriptor {
            layout_version: LAYOUT_VERSION,
            array_base_offset: HEADER_SIZE_BYTES,
            stride_bytes: STRIDE_BYTES,
            count: self.entries.len() as u32,
            variables,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> VariableCatalog {
        VariableCatalog::build(&[
            ("Aircraft.Altitude", VariableGroup::Aircraft, Some((-1000.0, 60000.0))),
            ("Aircraft.Pitch", VariableGroup::Aircraft, Some((-90.0, 90.0))),
            ("Controls.Throttle", VariableGroup::Controls, Some((0.0, 1.0))),
            ("Aircraft.Velocity.x", VariableGroup::Aircraft, None),
            ("Aircraft.Velocity.y", VariableGroup::Aircraft, None),
            ("Aircraft.Velocity.z", VariableGroup::Aircraft, None),
        ])
        .expect("valid catalog")
    }

    #[test]
    fn resolve_by_name_matches_declaration_order_index() {
        let cat = sample();
        assert_eq!(cat.resolve_by_name("Aircraft.Altitude").unwrap().index, 0);
        assert_eq!(cat.resolve_by_name("Controls.Throttle").unwrap().index, 2);
    }

    #[test]
    fn offset_invariant_holds_for_every_entry() {
        let cat = sample();
        for idx in 0..cat.len() as u32 {
            let r = cat.resolve_by_index(idx).unwrap();
            assert_eq!(r.storage_offset, HEADER_SIZE_BYTES + idx * STRIDE_BYTES);
        }
    }

    #[test]
    fn unknown_name_is_an_error_not_a_panic() {
        let cat = sample();
        assert_eq!(
            cat.resolve_by_name("Nope.Missing"),
            Err(CatalogError::Unknown("Nope.Missing".to_owned()))
        );
    }

    #[test]
    fn out_of_range_index_is_an_error() {
        let cat = sample();
        assert_eq!(cat.resolve_by_index(999), Err(CatalogError::OutOfRange(999)));
    }

    #[test]
    fn duplicate_name_rejected_at_build_time() {
        let result = VariableCatalog::build(&[
            ("Aircraft.Altitude", VariableGroup::Aircraft, None),
            ("Aircraft.Altitude", VariableGroup::Aircraft, None),
        ]);
        assert!(matches!(result, Err(CatalogError::DuplicateName(_))));
    }

    #[test]
    fn resolve_scalar_rejects_a_vector_base_name() {
        let cat = sample();
        assert_eq!(
            cat.resolve_scalar("Aircraft.Velocity"),
            Err(CatalogError::TypeMismatch("Aircraft.Velocity".to_owned()))
        );
    }

    #[test]
    fn resolve_scalar_accepts_an_ordinary_scalar_name() {
        let cat = sample();
        assert_eq!(cat.resolve_scalar("Controls.Throttle").unwrap().index, 2);
    }

    #[test]
    fn resolve_vector_components_uses_suffix_convention() {
        let cat = sample();
        let refs = cat.resolve_vector_components("Aircraft.Velocity", 3).unwrap();
        assert_eq!(refs.len(), 3);
        assert_eq!(refs[0].index, 3);
        assert_eq!(refs[2].index, 5);
    }

    #[test]
    fn resolve_by_id_matches_resolve_by_name() {
        let cat = sample();
        let by_name = cat.resolve_by_name("Controls.Throttle").unwrap();
        let id = fnv1a64("Controls.Throttle");
        let by_id = cat.resolve_by_id(id).unwrap();
        assert_eq!(by_name, by_id);
    }

    #[test]
    fn resolve_vector_by_id_finds_component_triple() {
        let cat = sample();
        let id = fnv1a64("Aircraft.Velocity");
        let refs = cat.resolve_vector_by_id(id).unwrap();
        assert_eq!(refs.len(), 3);
        assert_eq!(refs[0].index, 3);
        assert_eq!(refs[2].index, 5);
    }

    #[test]
    fn layout_descriptor_lists_every_entry_in_index_order() {
        let cat = sample();
        let layout = cat.layout_descriptor();
        assert_eq!(layout.count, 6);
        assert_eq!(layout.array_base_offset, HEADER_SIZE_BYTES);
        for (i, var) in layout.variables.iter().enumerate() {
            assert_eq!(var.index, i as u32);
        }
    }
}
