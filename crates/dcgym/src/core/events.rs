//! Standard simulation events.

// VM LIFECYCLE EVENTS /////////////////////////////////////////////////////////////////////////////

pub mod vm_lifecycle {
    use serde::Serialize;

    #[derive(Serialize, Clone)]
    pub struct VmCreationRequest {
        pub vm_id: u32,
    }

    #[derive(Serialize, Clone)]
    pub struct VmStarted {
        pub vm_id: u32,
    }

    #[derive(Serialize, Clone)]
    pub struct VmDestructionRequest {
        pub vm_id: u32,
    }

    #[derive(Serialize, Clone)]
    pub struct VmDeleted {
        pub vm_id: u32,
    }
}

// CLOUDLET FLOW EVENTS ////////////////////////////////////////////////////////////////////////////

pub mod cloudlet_flow {
    use serde::Serialize;

    /// Dispatch of a queued cloudlet onto a VM, emitted by the broker.
    #[derive(Serialize, Clone)]
    pub struct CloudletSubmit {
        pub cloudlet_id: u64,
        pub vm_id: u32,
    }

    /// A cloudlet finished executing and is handed back to the broker.
    #[derive(Serialize, Clone)]
    pub struct CloudletReturned {
        pub cloudlet_id: u64,
    }

    /// A submission arrived at a VM that is not running; the cloudlet goes
    /// back to the broker for re-admission.
    #[derive(Serialize, Clone)]
    pub struct CloudletBounced {
        pub cloudlet_id: u64,
    }
}

// PROCESSING EVENTS ///////////////////////////////////////////////////////////////////////////////

pub mod processing {
    use serde::Serialize;

    /// Re-evaluation of cloudlet progress on all VM schedulers.
    #[derive(Serialize, Clone)]
    pub struct UpdateProcessing {}

    /// Empty event injected during the final stretch of an episode so that
    /// in-flight cloudlets can finish before the event queue drains.
    #[derive(Serialize, Clone)]
    pub struct KeepAlive {}
}
