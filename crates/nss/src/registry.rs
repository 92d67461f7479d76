//! Provider registry
//!
//! Providers are looked up by descriptor type through an explicit registry
//! value built at startup, optionally pinned to one provider id.

use crate::backend::Backend;
use crate::context::{ContextDescription, NssContext};
use crate::error::Result;
use crate::jitter::{jitter_offset, jitter_phase_count};

/// Effect id of NSS; the high half of every NSS descriptor type
pub const EFFECT_ID_NSS: u32 = 0x000F_0000;
/// Bits of a descriptor type that name the effect
pub const EFFECT_MASK: u32 = 0xFFFF_0000;

/// Descriptor type tags understood by [`NssProvider`]
pub mod descriptor_type {
    pub const CREATE_CONTEXT: u32 = 0x000F_0000;
    pub const DISPATCH: u32 = 0x000F_0001;
    pub const QUERY_JITTER_PHASE_COUNT: u32 = 0x000F_0004;
    pub const QUERY_JITTER_OFFSET: u32 = 0x000F_0005;
}

pub const VERSION_MAJOR: u32 = 1;
pub const VERSION_MINOR: u32 = 0;
pub const VERSION_PATCH: u32 = 0;

/// Packs a version as `major.minor.patch` in 10/10/12 bits
pub const fn make_version(major: u32, minor: u32, patch: u32) -> u32 {
    (major << 22) | (minor << 12) | patch
}

/// A stateless query answered by a provider
///
/// Output slots are optional and only the present ones are written.
#[derive(Debug)]
pub enum Query<'a> {
    JitterPhaseCount {
        render_width: u32,
        display_width: u32,
        out: Option<&'a mut i32>,
    },
    JitterOffset {
        index: i32,
        phase_count: i32,
        out_x: Option<&'a mut f32>,
        out_y: Option<&'a mut f32>,
    },
}

impl Query<'_> {
    pub fn descriptor_type(&self) -> u32 {
        match self {
            Query::JitterPhaseCount { .. } => descriptor_type::QUERY_JITTER_PHASE_COUNT,
            Query::JitterOffset { .. } => descriptor_type::QUERY_JITTER_OFFSET,
        }
    }
}

/// An implementation of an effect selectable by descriptor type
pub trait Provider<B: Backend> {
    fn id(&self) -> u64;

    fn version_name(&self) -> &'static str;

    fn can_provide(&self, descriptor_type: u32) -> bool;

    fn create_context(&self, description: ContextDescription<B>) -> Result<NssContext<B>>;

    fn query(&self, query: &mut Query<'_>) -> Result<()>;
}

/// The NSS provider
#[derive(Debug, Clone, Copy, Default)]
pub struct NssProvider;

impl NssProvider {
    pub const ID: u64 = (0x2555_CA1E_u64 << 32) | make_version(VERSION_MAJOR, VERSION_MINOR, VERSION_PATCH) as u64;
    pub const VERSION_NAME: &'static str = "1.0.0";
}

impl<B: Backend> Provider<B> for NssProvider {
    fn id(&self) -> u64 {
        Self::ID
    }

    fn version_name(&self) -> &'static str {
        Self::VERSION_NAME
    }

    fn can_provide(&self, descriptor_type: u32) -> bool {
        descriptor_type & EFFECT_MASK == EFFECT_ID_NSS
    }

    fn create_context(&self, description: ContextDescription<B>) -> Result<NssContext<B>> {
        NssContext::new(description)
    }

    fn query(&self, query: &mut Query<'_>) -> Result<()> {
        match query {
            Query::JitterPhaseCount {
                render_width,
                display_width,
                out,
            } => {
                let count = jitter_phase_count(*render_width, *display_width);
                if let Some(out) = out {
                    **out = count;
                }
            }
            Query::JitterOffset {
                index,
                phase_count,
                out_x,
                out_y,
            } => {
                let (x, y) = jitter_offset(*index, *phase_count)?;
                if let Some(out_x) = out_x {
                    **out_x = x;
                }
                if let Some(out_y) = out_y {
                    **out_y = y;
                }
            }
        }
        Ok(())
    }
}

/// Providers in registration order
pub struct ProviderRegistry<B: Backend> {
    providers: Vec<Box<dyn Provider<B>>>,
}

impl<B: Backend> Default for ProviderRegistry<B> {
    fn default() -> Self {
        Self { providers: Vec::new() }
    }
}

impl<B: Backend + 'static> ProviderRegistry<B> {
    /// A registry holding only [`NssProvider`]
    pub fn with_nss() -> Self {
        let mut registry = Self::default();
        registry.register(NssProvider);
        registry
    }
}

impl<B: Backend> ProviderRegistry<B> {
    pub fn register(&mut self, provider: impl Provider<B> + 'static) {
        self.providers.push(Box::new(provider));
    }

    /// Picks the provider for `descriptor_type`
    ///
    /// A non-zero `override_id` selects the provider with exactly that id,
    /// regardless of type. Otherwise the first provider able to handle the
    /// type wins.
    pub fn find(&self, descriptor_type: u32, override_id: u64) -> Option<&dyn Provider<B>> {
        self.providers
            .iter()
            .find(|provider| {
                if override_id != 0 {
                    provider.id() == override_id
                } else {
                    provider.can_provide(descriptor_type)
                }
            })
            .map(|provider| provider.as_ref())
    }

    /// Id and version name of every provider able to handle `descriptor_type`
    pub fn versions(&self, descriptor_type: u32) -> Vec<(u64, &'static str)> {
        self.providers
            .iter()
            .filter(|provider| provider.can_provide(descriptor_type))
            .map(|provider| (provider.id(), provider.version_name()))
            .collect()
    }

    pub fn count(&self, descriptor_type: u32) -> usize {
        self.providers.iter().filter(|provider| provider.can_provide(descriptor_type)).count()
    }

    /// Answers `query` with the first provider that handles its type
    pub fn query(&self, query: &mut Query<'_>) -> Option<Result<()>> {
        self.find(query.descriptor_type(), 0).map(|provider| provider.query(query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::*;
    use crate::error::{BackendError, NssError};
    use crate::pipelines::{Pass, PermutationFlags};
    use bytes::Bytes;

    /// Backend that refuses everything; registry tests never create a context
    struct NoBackend;

    impl Backend for NoBackend {
        fn create_backend_context(&mut self) -> std::result::Result<EffectContextId, BackendError> {
            Err(BackendError::Api("no device".into()))
        }
        fn destroy_backend_context(&mut self, _: EffectContextId) -> std::result::Result<(), BackendError> {
            Ok(())
        }
        fn device_capabilities(&self) -> std::result::Result<DeviceCapabilities, BackendError> {
            Ok(DeviceCapabilities::default())
        }
        fn create_resource(&mut self, _: EffectContextId, _: &CreateResourceDescription) -> std::result::Result<InternalResource, BackendError> {
            Err(BackendError::Api("no device".into()))
        }
        fn destroy_resource(&mut self, _: EffectContextId, _: InternalResource) -> std::result::Result<(), BackendError> {
            Ok(())
        }
        fn register_resource(&mut self, _: EffectContextId, _: &ExternalResource) -> std::result::Result<InternalResource, BackendError> {
            Err(BackendError::Api("no device".into()))
        }
        fn unregister_resources(&mut self, _: EffectContextId, _: CommandList) -> std::result::Result<(), BackendError> {
            Ok(())
        }
        fn create_pipeline(
            &mut self,
            _: EffectContextId,
            _: Pass,
            _: PermutationFlags,
            _: &PipelineDescription,
        ) -> std::result::Result<PipelineState, BackendError> {
            Err(BackendError::Api("no device".into()))
        }
        fn create_data_graph_pipeline(
            &mut self,
            _: EffectContextId,
            _: Pass,
            _: PermutationFlags,
            _: &PipelineDescription,
            _: u32,
            _: u32,
        ) -> std::result::Result<PipelineState, BackendError> {
            Err(BackendError::Api("no device".into()))
        }
        fn destroy_pipeline(&mut self, _: EffectContextId, _: &PipelineState) -> std::result::Result<(), BackendError> {
            Ok(())
        }
        fn stage_constant_buffer(&mut self, _: Bytes) -> std::result::Result<ConstantBuffer, BackendError> {
            Err(BackendError::Api("no device".into()))
        }
        fn schedule_gpu_job(&mut self, _: GpuJob) -> std::result::Result<(), BackendError> {
            Ok(())
        }
        fn execute_gpu_jobs(&mut self, _: EffectContextId, _: CommandList) -> std::result::Result<(), BackendError> {
            Ok(())
        }
    }

    /// A second provider for an unrelated effect
    struct OtherProvider;

    impl Provider<NoBackend> for OtherProvider {
        fn id(&self) -> u64 {
            0x1234
        }
        fn version_name(&self) -> &'static str {
            "9.9.9"
        }
        fn can_provide(&self, descriptor_type: u32) -> bool {
            descriptor_type & EFFECT_MASK == 0x0001_0000
        }
        fn create_context(&self, _: ContextDescription<NoBackend>) -> Result<NssContext<NoBackend>> {
            Err(NssError::NullDevice)
        }
        fn query(&self, _: &mut Query<'_>) -> Result<()> {
            Ok(())
        }
    }

    fn registry() -> ProviderRegistry<NoBackend> {
        let mut registry = ProviderRegistry::default();
        registry.register(OtherProvider);
        registry.register(NssProvider);
        registry
    }

    #[test]
    fn test_provider_id_and_version() {
        assert_eq!(make_version(1, 0, 0), 0x0040_0000);
        assert_eq!(NssProvider::ID, 0x2555_CA1E_0040_0000);
        assert_eq!(<NssProvider as Provider<NoBackend>>::version_name(&NssProvider), "1.0.0");
    }

    #[test]
    fn test_can_provide_masks_effect_id() {
        let provider = NssProvider;
        for ty in [
            descriptor_type::CREATE_CONTEXT,
            descriptor_type::DISPATCH,
            descriptor_type::QUERY_JITTER_PHASE_COUNT,
            descriptor_type::QUERY_JITTER_OFFSET,
        ] {
            assert!(Provider::<NoBackend>::can_provide(&provider, ty));
        }
        assert!(!Provider::<NoBackend>::can_provide(&provider, 0x0001_0000));
    }

    #[test]
    fn test_find_by_type_and_override() {
        let registry = registry();
        assert_eq!(registry.find(descriptor_type::DISPATCH, 0).map(|p| p.id()), Some(NssProvider::ID));
        assert_eq!(registry.find(0x0001_0003, 0).map(|p| p.id()), Some(0x1234));
        assert!(registry.find(0x0002_0000, 0).is_none());

        // An override wins over the type
        assert_eq!(registry.find(descriptor_type::DISPATCH, 0x1234).map(|p| p.id()), Some(0x1234));
        assert!(registry.find(descriptor_type::DISPATCH, 0xdead).is_none());
    }

    #[test]
    fn test_versions_and_count() {
        let registry = registry();
        assert_eq!(registry.versions(descriptor_type::CREATE_CONTEXT), vec![(NssProvider::ID, "1.0.0")]);
        assert_eq!(registry.count(descriptor_type::CREATE_CONTEXT), 1);
        assert_eq!(registry.count(0x0003_0000), 0);
    }

    #[test]
    fn test_phase_count_query() {
        let registry = registry();
        let mut count = 0;
        let mut query = Query::JitterPhaseCount {
            render_width: 960,
            display_width: 1920,
            out: Some(&mut count),
        };
        assert_eq!(query.descriptor_type(), descriptor_type::QUERY_JITTER_PHASE_COUNT);
        assert_eq!(registry.query(&mut query), Some(Ok(())));
        assert_eq!(count, 32);
    }

    #[test]
    fn test_offset_query_writes_present_slots_only() {
        let registry = registry();
        let mut x = 5.0;
        let mut query = Query::JitterOffset {
            index: 1,
            phase_count: 8,
            out_x: Some(&mut x),
            out_y: None,
        };
        assert_eq!(registry.query(&mut query), Some(Ok(())));
        assert_eq!(x, 0.25 - 0.5);

        let mut query = Query::JitterOffset {
            index: 1,
            phase_count: 0,
            out_x: None,
            out_y: None,
        };
        assert!(matches!(registry.query(&mut query), Some(Err(NssError::InvalidArgument(_)))));
    }

    #[test]
    fn test_create_through_provider_propagates_backend_error() {
        let registry = registry();
        let provider = registry.find(descriptor_type::CREATE_CONTEXT, 0).unwrap();
        let description = ContextDescription::new(NoBackend, crate::Dimensions2D::new(960, 540), crate::Dimensions2D::new(1920, 1080));
        let error = provider.create_context(description).err().unwrap();
        assert_eq!(error, NssError::Backend(BackendError::Api("no device".into())));
    }
}
