use std::cell::UnsafeCell;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::Error;

/// Storage location tag for a field buffer. Device-resident buffers are only
/// ever touched by the leader context through a `DeviceContext`; host
/// contexts other than the leader must not read or write them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryLocation {
    Host,
    Device,
}

/**
 * A dense array of scalar samples, one per grid cell per component. Buffers
 * are allocated once, zero-initialized, and never resized.
 *
 * Multiple execution contexts hold shared references to the same buffer
 * during a solve step. Soundness rests on the row-partition discipline of
 * the solvers, not on locking: within a parallel phase every context writes
 * only the cells of its own contiguous row chunk, and any read that crosses
 * a chunk boundary happens in a later phase, separated from the writes that
 * produced it by a pool barrier.
 */
pub struct FieldBuffer {
    name: String,
    location: MemoryLocation,
    components: usize,
    data: Box<[UnsafeCell<f64>]>,
}

unsafe impl Sync for FieldBuffer {}

// ============================================================================
impl FieldBuffer {
    fn new(name: &str, location: MemoryLocation, components: usize, cell_count: usize) -> Self {
        let data = (0..components * cell_count)
            .map(|_| UnsafeCell::new(0.0))
            .collect();
        Self {
            name: name.to_string(),
            location,
            components,
            data,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn location(&self) -> MemoryLocation {
        self.location
    }

    pub fn components(&self) -> usize {
        self.components
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn get(&self, i: usize) -> f64 {
        unsafe { *self.data[i].get() }
    }

    /// Write one sample. Callers must respect the row-partition discipline
    /// described on the type.
    #[inline]
    pub fn set(&self, i: usize, value: f64) {
        unsafe { *self.data[i].get() = value }
    }

    #[inline]
    pub fn add(&self, i: usize, value: f64) {
        unsafe { *self.data[i].get() += value }
    }

    /// Fill the whole buffer. Only valid outside parallel phases.
    pub fn fill(&self, value: f64) {
        for cell in self.data.iter() {
            unsafe { *cell.get() = value }
        }
    }

    /// Snapshot the buffer contents. Only meaningful between solve steps or
    /// from within a barrier-protected phase that no peer is writing.
    pub fn to_vec(&self) -> Vec<f64> {
        (0..self.len()).map(|i| self.get(i)).collect()
    }

    pub fn copy_from_slice(&self, src: &[f64]) {
        assert_eq!(src.len(), self.len(), "field size mismatch on copy");
        for (i, &x) in src.iter().enumerate() {
            self.set(i, x);
        }
    }
}

/**
 * Named registry of field buffers. Solvers create their fields here at
 * configuration time and look them up by name; external writers snapshot
 * state through the same names.
 */
#[derive(Default)]
pub struct Workspace {
    fields: Mutex<HashMap<String, Arc<FieldBuffer>>>,
}

// ============================================================================
impl Workspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a zero-filled field, `components` samples per cell. Names
    /// are unique within the workspace.
    pub fn create_field(
        &self,
        name: &str,
        location: MemoryLocation,
        components: usize,
        cell_count: usize,
    ) -> Result<Arc<FieldBuffer>, Error> {
        if components == 0 {
            return Err(Error::Misconfiguration(format!(
                "field \"{}\" must have at least one component",
                name
            )));
        }
        let mut fields = self.fields.lock().unwrap();
        if fields.contains_key(name) {
            return Err(Error::Misconfiguration(format!(
                "field \"{}\" already exists in the workspace",
                name
            )));
        }
        let buffer = Arc::new(FieldBuffer::new(name, location, components, cell_count));
        fields.insert(name.to_string(), buffer.clone());
        Ok(buffer)
    }

    pub fn get(&self, name: &str) -> Option<Arc<FieldBuffer>> {
        self.fields.lock().unwrap().get(name).cloned()
    }

    pub fn field_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.fields.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }
}

// ============================================================================
#[cfg(test)]
mod test {
    use super::{MemoryLocation, Workspace};
    use crate::error::Error;

    #[test]
    fn fields_are_zero_initialized_and_retrievable_by_name() {
        let workspace = Workspace::new();
        let rho = workspace
            .create_field("rho", MemoryLocation::Host, 1, 16)
            .unwrap();
        assert_eq!(rho.len(), 16);
        assert!(rho.to_vec().iter().all(|&x| x == 0.0));

        let again = workspace.get("rho").unwrap();
        again.set(3, 2.5);
        assert_eq!(rho.get(3), 2.5);
        assert!(workspace.get("missing").is_none());

        workspace
            .create_field("ez", MemoryLocation::Host, 1, 16)
            .unwrap();
        assert_eq!(workspace.field_names(), vec!["ez", "rho"]);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let workspace = Workspace::new();
        workspace
            .create_field("ez", MemoryLocation::Host, 1, 4)
            .unwrap();
        assert!(matches!(
            workspace.create_field("ez", MemoryLocation::Device, 1, 4),
            Err(Error::Misconfiguration(_))
        ));
    }

    #[test]
    fn zero_component_fields_are_rejected() {
        let workspace = Workspace::new();
        assert!(matches!(
            workspace.create_field("bad", MemoryLocation::Host, 0, 4),
            Err(Error::Misconfiguration(_))
        ));
    }

    #[test]
    fn component_count_scales_the_allocation() {
        let workspace = Workspace::new();
        let velocity = workspace
            .create_field("velocity", MemoryLocation::Host, 2, 9)
            .unwrap();
        assert_eq!(velocity.len(), 18);
        assert_eq!(velocity.components(), 2);
        assert_eq!(velocity.location(), MemoryLocation::Host);
    }
}
