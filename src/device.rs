use std::sync::Mutex;

use log::error;

use crate::error::Error;
use crate::workspace::{FieldBuffer, MemoryLocation};

/// Which substrate executes the per-cell kernels of a solver. Chosen once at
/// configuration time and never switched per step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionTarget {
    Host,
    Device,
}

/**
 * Synchronous interface to an accelerator: explicit transfers between host
 * and device buffers and fallible kernel launches issued by the leader
 * context only, which blocks until the kernel completes. The in-tree
 * backend emulates the device by running the same per-cell kernel code over
 * device-resident buffers, so the host and device paths are numerically
 * identical by construction; a hardware backend replaces the body of
 * `launch` and the transfer routines without changing the interface.
 *
 * A failed transfer or launch is logged and surfaced as
 * `Error::DeviceFailure`; the affected buffers keep their pre-step
 * contents, and callers must stop stepping.
 */
pub struct DeviceContext {
    fault: Mutex<Option<String>>,
}

// ============================================================================
impl DeviceContext {
    pub fn new() -> Self {
        Self {
            fault: Mutex::new(None),
        }
    }

    /// Copy a host buffer into a device buffer of the same size.
    pub fn upload(&self, src: &FieldBuffer, dst: &FieldBuffer) -> Result<(), Error> {
        self.transfer(src, dst, MemoryLocation::Host, MemoryLocation::Device)
    }

    /// Copy a device buffer back into a host buffer of the same size.
    pub fn download(&self, src: &FieldBuffer, dst: &FieldBuffer) -> Result<(), Error> {
        self.transfer(src, dst, MemoryLocation::Device, MemoryLocation::Host)
    }

    fn transfer(
        &self,
        src: &FieldBuffer,
        dst: &FieldBuffer,
        src_location: MemoryLocation,
        dst_location: MemoryLocation,
    ) -> Result<(), Error> {
        if src.location() != src_location || dst.location() != dst_location {
            let failure = Error::DeviceFailure(format!(
                "transfer \"{}\" -> \"{}\" crosses the wrong memory spaces",
                src.name(),
                dst.name()
            ));
            error!("{}", failure);
            return Err(failure);
        }
        if src.len() != dst.len() {
            let failure = Error::DeviceFailure(format!(
                "transfer \"{}\" ({}) -> \"{}\" ({}) size mismatch",
                src.name(),
                src.len(),
                dst.name(),
                dst.len()
            ));
            error!("{}", failure);
            return Err(failure);
        }
        for i in 0..src.len() {
            dst.set(i, src.get(i));
        }
        Ok(())
    }

    /// Launch a kernel and block until it completes. Only the leader context
    /// may call this; other host contexts must not touch device-resident
    /// buffers while the launch is in flight.
    pub fn launch<F>(&self, kernel: &str, body: F) -> Result<(), Error>
    where
        F: FnOnce(),
    {
        if let Some(message) = self.fault.lock().unwrap().take() {
            let failure = Error::DeviceFailure(format!("kernel \"{}\": {}", kernel, message));
            error!("{}", failure);
            return Err(failure);
        }
        body();
        Ok(())
    }

    /// Make the next launch fail, standing in for a driver-reported error.
    pub fn inject_fault(&self, message: &str) {
        *self.fault.lock().unwrap() = Some(message.to_string());
    }
}

impl Default for DeviceContext {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
#[cfg(test)]
mod test {
    use super::DeviceContext;
    use crate::error::Error;
    use crate::workspace::{MemoryLocation, Workspace};

    #[test]
    fn transfers_copy_between_memory_spaces() {
        let workspace = Workspace::new();
        let host = workspace
            .create_field("mh", MemoryLocation::Host, 1, 8)
            .unwrap();
        let device = workspace
            .create_field("gpu_mh", MemoryLocation::Device, 1, 8)
            .unwrap();
        let context = DeviceContext::new();

        host.copy_from_slice(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        context.upload(&host, &device).unwrap();
        assert_eq!(device.to_vec(), host.to_vec());

        device.set(0, -1.0);
        context.download(&device, &host).unwrap();
        assert_eq!(host.get(0), -1.0);
    }

    #[test]
    fn mismatched_transfers_are_device_failures() {
        let workspace = Workspace::new();
        let host = workspace
            .create_field("er", MemoryLocation::Host, 1, 8)
            .unwrap();
        let small = workspace
            .create_field("gpu_er", MemoryLocation::Device, 1, 4)
            .unwrap();
        let context = DeviceContext::new();

        assert!(matches!(
            context.upload(&host, &small),
            Err(Error::DeviceFailure(_))
        ));
        // Wrong direction: both arguments host-resident.
        assert!(matches!(
            context.download(&host, &host),
            Err(Error::DeviceFailure(_))
        ));
    }

    #[test]
    fn injected_faults_abort_the_next_launch_only() {
        let context = DeviceContext::new();
        context.inject_fault("out of memory");

        let mut ran = false;
        let result = context.launch("step", || ran = true);
        assert!(matches!(result, Err(Error::DeviceFailure(_))));
        assert!(!ran, "a failed launch must not run the kernel");

        context.launch("step", || ran = true).unwrap();
        assert!(ran);
    }
}
