use super::TextureId;

/// Failures reported by a [`GpuDevice`](super::GpuDevice).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DeviceError {
    #[error("device lost")]
    Lost,
    #[error("out of texture memory")]
    OutOfMemory,
    #[error("unknown texture {0:?}")]
    UnknownTexture(TextureId),
    #[error("region outside of resource bounds")]
    InvalidRegion,
    #[error("backend error: {0}")]
    Backend(String),
}
