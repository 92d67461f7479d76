//! Context creation and destruction
//!
//! An [`NssContext`] owns its backend, every internally allocated resource and
//! the compiled pipeline set. Creation validates the description, checks the
//! device, decides on padding and precision, then allocates everything up
//! front so that a dispatch never allocates.

use crate::Dimensions2D;
use crate::backend::{Backend, DeviceCapabilities, EffectContextId, EntryPoints};
use crate::constants::{CONSTANT_BLOCK_WORDS, ConstantBlock, Precision};
use crate::error::{NssError, Result};
use crate::padding::PaddedResolution;
use crate::pipelines::{PermutationFlags, PipelineConfig, PipelineSet};
use crate::resources::{OwnedResources, ResourceLayout, ResourceTable};
use crate::types::{ContextFlags, MessageCallback, MessageType, QualityMode};

/// Description of a context to create
///
/// ```ignore
/// let description = ContextDescription::new(backend, Dimensions2D::new(960, 540), Dimensions2D::new(1920, 1080))
///     .with_quality(QualityMode::Quality)
///     .with_flags(ContextFlags::QUANTIZED | ContextFlags::ENABLE_DEBUG_CHECKING);
/// let context = NssContext::new(description)?;
/// ```
pub struct ContextDescription<B: Backend> {
    pub quality: QualityMode,
    pub flags: ContextFlags,
    pub max_render_size: Dimensions2D,
    pub max_upscale_size: Dimensions2D,
    pub backend: B,
    pub message_callback: Option<MessageCallback>,
}

impl<B: Backend> ContextDescription<B> {
    /// Balanced quality, no flags, no message callback
    pub fn new(backend: B, max_render_size: Dimensions2D, max_upscale_size: Dimensions2D) -> Self {
        Self {
            quality: QualityMode::default(),
            flags: ContextFlags::empty(),
            max_render_size,
            max_upscale_size,
            backend,
            message_callback: None,
        }
    }

    pub fn with_quality(mut self, quality: QualityMode) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_flags(mut self, flags: ContextFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Routes errors and warnings to `callback` in addition to `tracing`
    pub fn with_message_callback(mut self, callback: impl Fn(MessageType, &str) + Send + Sync + 'static) -> Self {
        self.message_callback = Some(std::sync::Arc::new(callback));
        self
    }
}

/// Delivers messages to the caller's callback and mirrors them to `tracing`
#[derive(Clone, Default)]
pub(crate) struct Messenger {
    callback: Option<MessageCallback>,
}

impl Messenger {
    pub(crate) fn emit(&self, severity: MessageType, message: &str) {
        match severity {
            MessageType::Error => tracing::error!("{message}"),
            MessageType::Warning => tracing::warn!("{message}"),
        }
        if let Some(callback) = &self.callback {
            callback(severity, message);
        }
    }
}

/// Everything [`NssContext::new`] builds after the backend context exists
struct ContextParts {
    capabilities: DeviceCapabilities,
    padded: PaddedResolution,
    has_padding_pass: bool,
    precision: Precision,
    permutation: PermutationFlags,
    resources: OwnedResources,
    pipelines: PipelineSet,
}

/// One configured instance of the upscaler
pub struct NssContext<B: Backend> {
    pub(crate) quality: QualityMode,
    pub(crate) flags: ContextFlags,
    pub(crate) max_render_size: Dimensions2D,
    pub(crate) max_upscale_size: Dimensions2D,
    pub(crate) messenger: Messenger,
    pub(crate) backend: B,
    pub(crate) effect_context: EffectContextId,
    pub(crate) capabilities: DeviceCapabilities,
    pub(crate) padded: PaddedResolution,
    pub(crate) has_padding_pass: bool,
    pub(crate) precision: Precision,
    pub(crate) permutation: PermutationFlags,
    pub(crate) resources: OwnedResources,
    pub(crate) table: ResourceTable,
    pub(crate) pipelines: PipelineSet,
    pub(crate) constants: ConstantBlock,
    /// Ping-pong window position, advanced once per dispatch
    pub(crate) frame_index: u32,
    pub(crate) first_execution: bool,
    pub(crate) destroyed: bool,
}

impl<B: Backend> NssContext<B> {
    /// Creates a context
    ///
    /// Fails with [`NssError::IncompleteInterface`] before touching the backend
    /// if it lacks a required entry point, and with [`NssError::InvalidAlignment`]
    /// for a zero maximum size. A device without tensor and data graph support
    /// yields [`NssError::NullDevice`]. Nothing stays allocated on failure.
    pub fn new(description: ContextDescription<B>) -> Result<Self> {
        let ContextDescription {
            quality,
            flags,
            max_render_size,
            max_upscale_size,
            mut backend,
            message_callback,
        } = description;

        let missing = EntryPoints::REQUIRED.difference(backend.entry_points());
        if !missing.is_empty() {
            let names: Vec<_> = missing.iter_names().map(|(name, _)| name).collect();
            return Err(NssError::IncompleteInterface(names.join(", ")));
        }
        if max_render_size.has_zero_dimension() {
            return Err(NssError::InvalidAlignment("maxRenderSize"));
        }
        if max_upscale_size.has_zero_dimension() {
            return Err(NssError::InvalidAlignment("maxUpscaleSize"));
        }

        let messenger = Messenger { callback: message_callback };
        let effect_context = backend.create_backend_context()?;

        let parts = match Self::create_parts(&mut backend, effect_context, &messenger, flags, max_render_size, max_upscale_size) {
            Ok(parts) => parts,
            Err(error) => {
                if let Err(destroy_error) = backend.destroy_backend_context(effect_context) {
                    tracing::warn!(%destroy_error, "failed to destroy backend context after creation failure");
                }
                return Err(error);
            }
        };

        tracing::info!(
            quality = quality.name(),
            max_render_size = %max_render_size,
            max_upscale_size = %max_upscale_size,
            padded_input = %parts.padded.input,
            padded_output = %parts.padded.output,
            padding_pass = parts.has_padding_pass,
            permutation = ?parts.permutation,
            precision = parts.precision.name(),
            "created NSS context"
        );

        let table = ResourceTable::with_owned(&parts.resources);
        Ok(Self {
            quality,
            flags,
            max_render_size,
            max_upscale_size,
            messenger,
            backend,
            effect_context,
            capabilities: parts.capabilities,
            padded: parts.padded,
            has_padding_pass: parts.has_padding_pass,
            precision: parts.precision,
            permutation: parts.permutation,
            resources: parts.resources,
            table,
            pipelines: parts.pipelines,
            constants: ConstantBlock::new(parts.precision),
            frame_index: 0,
            first_execution: true,
            destroyed: false,
        })
    }

    fn create_parts(
        backend: &mut B,
        effect_context: EffectContextId,
        messenger: &Messenger,
        flags: ContextFlags,
        max_render_size: Dimensions2D,
        max_upscale_size: Dimensions2D,
    ) -> Result<ContextParts> {
        let capabilities = backend.device_capabilities()?;
        if !capabilities.supports_neural_graphics() {
            messenger.emit(
                MessageType::Error,
                "NSS requires device with support for tensors and data graphs. Please check device capabilities.",
            );
            return Err(NssError::NullDevice);
        }

        let padded = PaddedResolution::compute(max_render_size, max_upscale_size);
        let has_padding_pass = padded.changed && !flags.contains(ContextFlags::DISABLE_PADDING);

        let allow_16bit = flags.contains(ContextFlags::ALLOW_16BIT);
        if allow_16bit && !capabilities.fp16_supported {
            messenger.emit(MessageType::Warning, "16-bit resources requested but not supported by the device.");
        }
        let precision = Precision::resolve(allow_16bit, capabilities.fp16_supported);
        let permutation = PermutationFlags::select(flags, precision, padded.upscale_ratio());

        let layout = ResourceLayout {
            padded_input: padded.input,
            padded_output: padded.output,
            flags,
            has_padding_pass,
        };
        let resources = OwnedResources::allocate(backend, effect_context, &layout)?;

        let config = PipelineConfig {
            context_flags: flags,
            permutation,
            has_padding_pass,
            padded_input: padded.input,
            constant_block_words: CONSTANT_BLOCK_WORDS,
        };
        let mut pipelines = PipelineSet::default();
        if let Err(error) = pipelines.create(backend, effect_context, &config) {
            if let Err(release_error) = pipelines.release(backend, effect_context) {
                tracing::warn!(%release_error, "failed to release pipelines after creation failure");
            }
            if let Err(release_error) = resources.release(backend, effect_context) {
                tracing::warn!(%release_error, "failed to release resources after creation failure");
            }
            return Err(error);
        }

        Ok(ContextParts {
            capabilities,
            padded,
            has_padding_pass,
            precision,
            permutation,
            resources,
            pipelines,
        })
    }

    fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            context_flags: self.flags,
            permutation: self.permutation,
            has_padding_pass: self.has_padding_pass,
            padded_input: self.padded.input,
            constant_block_words: CONSTANT_BLOCK_WORDS,
        }
    }

    /// Compiles a fresh generation of every pipeline
    ///
    /// Each old pipeline is released right before its replacement is created.
    pub fn recreate_pipelines(&mut self) -> Result<()> {
        if self.destroyed {
            return Err(NssError::NullDevice);
        }
        let config = self.pipeline_config();
        self.pipelines.create(&mut self.backend, self.effect_context, &config)?;
        tracing::debug!(permutation = ?self.permutation, "recreated pipelines");
        Ok(())
    }

    /// Releases every pipeline and owned resource, then the backend context
    ///
    /// Teardown continues past backend failures and reports the first one. A
    /// second call fails with [`NssError::InvalidPointer`].
    pub fn destroy(&mut self) -> Result<()> {
        if self.destroyed {
            return Err(NssError::InvalidPointer);
        }
        self.destroyed = true;

        let pipelines = self.pipelines.release(&mut self.backend, self.effect_context);
        let resources = self.resources.release(&mut self.backend, self.effect_context);
        self.table.clear_all();
        let backend_context = self.backend.destroy_backend_context(self.effect_context).map_err(NssError::from);

        tracing::info!(context = self.effect_context.0, "destroyed NSS context");
        pipelines.and(resources).and(backend_context)
    }

    pub fn quality(&self) -> QualityMode {
        self.quality
    }

    pub fn flags(&self) -> ContextFlags {
        self.flags
    }

    pub fn max_render_size(&self) -> Dimensions2D {
        self.max_render_size
    }

    pub fn max_upscale_size(&self) -> Dimensions2D {
        self.max_upscale_size
    }

    pub fn padded_resolution(&self) -> PaddedResolution {
        self.padded
    }

    /// Whether the mirror padding pass and the crop copy run each frame
    pub fn has_padding_pass(&self) -> bool {
        self.has_padding_pass
    }

    pub fn precision(&self) -> Precision {
        self.precision
    }

    pub fn permutation(&self) -> PermutationFlags {
        self.permutation
    }

    pub fn capabilities(&self) -> DeviceCapabilities {
        self.capabilities
    }

    pub fn effect_context(&self) -> EffectContextId {
        self.effect_context
    }

    /// Position in the ping-pong window of the next dispatch
    pub fn frame_index(&self) -> u32 {
        self.frame_index
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn owned_resources(&self) -> &OwnedResources {
        &self.resources
    }

    pub fn resource_table(&self) -> &ResourceTable {
        &self.table
    }

    pub fn pipelines(&self) -> &PipelineSet {
        &self.pipelines
    }

    /// Constants staged by the most recent dispatch
    pub fn constants(&self) -> &ConstantBlock {
        &self.constants
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

impl<B: Backend> Drop for NssContext<B> {
    fn drop(&mut self) {
        if self.destroyed {
            return;
        }
        if let Err(error) = self.destroy() {
            tracing::warn!(%error, "failed to destroy NSS context on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_messenger_forwards_to_callback() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let messenger = Messenger {
            callback: Some(Arc::new(move |severity: MessageType, message: &str| sink.lock().unwrap().push((severity, message.to_string())))),
        };
        messenger.emit(MessageType::Warning, "first");
        messenger.emit(MessageType::Error, "second");

        let received = received.lock().unwrap();
        assert_eq!(*received, vec![(MessageType::Warning, "first".to_string()), (MessageType::Error, "second".to_string())]);
    }

    #[test]
    fn test_messenger_without_callback_is_silent() {
        Messenger::default().emit(MessageType::Error, "nobody listens");
    }
}
