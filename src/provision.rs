//! Null sink provisioning.
//!
//! The relay records from a sink that only exists for this purpose: a
//! `module-null-sink` instance whose monitor source carries whatever is
//! played to it. Provisioning loads the module, then walks the server's sink
//! list to find the sink that module created.

use crate::server::{AudioServer, ModuleId, SampleSpec, SinkListItem};
use crate::{RelayError, ServerError};

/// Module that creates the virtual sink.
pub const NULL_SINK_MODULE: &str = "module-null-sink";

/// Channels the virtual sink is created with.
pub const SINK_CHANNELS: u8 = 2;

/// The sink the relay asks for, and what the server assigned to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkDescriptor {
    /// Requested sink name.
    pub name: String,
    /// Description shown in mixers.
    pub description: String,
    /// Requested sample rate.
    pub sample_rate: u32,
    /// Module the server loaded for the sink, once known.
    pub module: Option<ModuleId>,
}

impl SinkDescriptor {
    /// Describes a sink that has not been requested yet.
    pub fn new(name: impl Into<String>, description: impl Into<String>, sample_rate: u32) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            sample_rate,
            module: None,
        }
    }

    /// Argument string for [`NULL_SINK_MODULE`].
    ///
    /// Spaces in the description are backslash-escaped so the property
    /// value stays a single token.
    pub fn module_args(&self) -> String {
        format!(
            "sink_name=\"{}\" rate={} channels={} sink_properties=device.description=\"{}\"",
            self.name,
            self.sample_rate,
            SINK_CHANNELS,
            self.description.replace(' ', "\\ ")
        )
    }

    /// Name of the monitor source paired with a sink called `sink`.
    pub fn monitor_of(sink: &str) -> String {
        format!("{sink}.monitor")
    }
}

/// The sink found in the enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedSink {
    /// Module that owns the sink.
    pub module: ModuleId,
    /// Sink name as listed by the server.
    pub sink: String,
    /// Monitor source to record from.
    pub monitor: String,
    /// Format the sink runs at.
    pub sample_spec: SampleSpec,
}

/// Where a [`Provisioner`] is in its sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionPhase {
    /// Nothing requested on the current connection.
    Idle,
    /// Waiting for the module load to complete.
    Requested,
    /// Waiting for our sink in the enumeration.
    Enumerating,
    /// The sink was found.
    Located,
}

/// Drives sink creation and lookup for one connection.
#[derive(Debug)]
pub struct Provisioner {
    descriptor: SinkDescriptor,
    phase: ProvisionPhase,
}

impl Provisioner {
    /// Creates a provisioner for `descriptor`.
    pub fn new(descriptor: SinkDescriptor) -> Self {
        Self {
            descriptor,
            phase: ProvisionPhase::Idle,
        }
    }

    /// The sink being provisioned.
    pub fn descriptor(&self) -> &SinkDescriptor {
        &self.descriptor
    }

    /// Current phase.
    pub fn phase(&self) -> ProvisionPhase {
        self.phase
    }

    /// Module id recorded for the sink, if the load completed.
    pub fn module(&self) -> Option<ModuleId> {
        self.descriptor.module
    }

    /// Asks the server to load the null sink.
    pub fn request_sink(&mut self, server: &mut dyn AudioServer) -> Result<(), RelayError> {
        let args = self.descriptor.module_args();
        tracing::debug!(module = NULL_SINK_MODULE, %args, "requesting sink");
        server.load_module(NULL_SINK_MODULE, &args)?;
        self.phase = ProvisionPhase::Requested;
        Ok(())
    }

    /// Records the loaded module and starts enumerating sinks.
    ///
    /// A rejected load is a provisioning failure.
    pub fn on_sink_created(
        &mut self,
        server: &mut dyn AudioServer,
        result: Result<ModuleId, ServerError>,
    ) -> Result<(), RelayError> {
        let module = result.map_err(|e| RelayError::Provisioning {
            reason: format!("loading {NULL_SINK_MODULE} failed: {e}"),
        })?;

        tracing::info!(module, sink = %self.descriptor.name, "sink module loaded");
        self.descriptor.module = Some(module);
        self.phase = ProvisionPhase::Enumerating;
        server.list_sinks()?;
        Ok(())
    }

    /// Checks one enumeration item against the recorded module.
    ///
    /// Returns the sink when its owner matches, `None` for other sinks, and
    /// [`RelayError::SinkNotFound`] when the list ends without a match.
    /// Items arriving outside the enumeration phase are ignored.
    pub fn find_owned_sink(
        &mut self,
        item: SinkListItem,
    ) -> Result<Option<LocatedSink>, RelayError> {
        if self.phase != ProvisionPhase::Enumerating {
            return Ok(None);
        }
        let Some(module) = self.descriptor.module else {
            return Ok(None);
        };

        match item {
            SinkListItem::Entry(info) if info.owner_module == Some(module) => {
                self.phase = ProvisionPhase::Located;
                let monitor = SinkDescriptor::monitor_of(&info.name);
                tracing::info!(sink = %info.name, %monitor, spec = %info.sample_spec, "sink located");
                Ok(Some(LocatedSink {
                    module,
                    sink: info.name,
                    monitor,
                    sample_spec: info.sample_spec,
                }))
            }
            SinkListItem::Entry(info) => {
                tracing::trace!(sink = %info.name, "ignoring sink owned by another module");
                Ok(None)
            }
            SinkListItem::End => Err(RelayError::SinkNotFound { module }),
        }
    }

    /// Forgets the module and returns it, so a new connection starts over.
    pub fn reset(&mut self) -> Option<ModuleId> {
        self.phase = ProvisionPhase::Idle;
        self.descriptor.module.take()
    }
}
