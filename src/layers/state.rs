//! Forward/backward pairing for layers that cache forward state.

use crate::error::{LayerError, Result};

/// Two-state machine guarding a layer's forward cache.
///
/// `forward` moves `Ready -> Forwarded(cache)`, `backward` moves it back and
/// hands the cache over. Any other transition is a usage error.
#[derive(Debug, Clone)]
pub(crate) enum Pass<C> {
    Ready,
    Forwarded(C),
}

impl<C> Default for Pass<C> {
    fn default() -> Self {
        Pass::Ready
    }
}

impl<C> Pass<C> {
    /// Store the cache produced by a forward call.
    pub(crate) fn store(&mut self, layer: &'static str, cache: C) -> Result<()> {
        if let Pass::Forwarded(_) = self {
            return Err(LayerError::ForwardPending { layer });
        }
        *self = Pass::Forwarded(cache);
        Ok(())
    }

    /// Fail early when a forward would overwrite an unconsumed cache.
    pub(crate) fn ensure_ready(&self, layer: &'static str) -> Result<()> {
        match self {
            Pass::Ready => Ok(()),
            Pass::Forwarded(_) => Err(LayerError::ForwardPending { layer }),
        }
    }

    /// Take the cache for a backward call.
    pub(crate) fn take(&mut self, layer: &'static str) -> Result<C> {
        match std::mem::take(self) {
            Pass::Forwarded(cache) => Ok(cache),
            Pass::Ready => Err(LayerError::BackwardWithoutForward { layer }),
        }
    }

    /// Put a cache back after a failed backward so the caller can retry.
    pub(crate) fn restore(&mut self, cache: C) {
        *self = Pass::Forwarded(cache);
    }

    pub(crate) fn clear(&mut self) {
        *self = Pass::Ready;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backward_before_forward_fails() {
        let mut pass: Pass<u8> = Pass::Ready;
        assert!(matches!(
            pass.take("test"),
            Err(LayerError::BackwardWithoutForward { layer: "test" })
        ));
    }

    #[test]
    fn test_double_forward_fails() {
        let mut pass = Pass::Ready;
        pass.store("test", 1u8).unwrap();
        assert!(matches!(
            pass.store("test", 2),
            Err(LayerError::ForwardPending { .. })
        ));
        assert_eq!(pass.take("test").unwrap(), 1);
        assert!(matches!(pass, Pass::Ready));
    }
}
