//! Administrative owner of an interceptor set and its published chain.

use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use switchyard_core::{BuildError, Chain, Interceptor, PhaseSnapshot};

use super::builder::ChainBuilder;

/// Interceptor set plus the chain currently built from it.
///
/// Changes are serialized by a build lock and each successful change
/// publishes a freshly built chain through an atomic pointer swap, so readers
/// never block and in-flight invocations keep the chain they started with.
/// A change that fails to build leaves both the set and the published chain
/// untouched.
pub struct Pipeline {
    builder: ChainBuilder,
    interceptors: Mutex<Vec<Arc<dyn Interceptor>>>,
    chain: ArcSwap<Chain>,
}

impl Pipeline {
    /// Creates an empty pipeline over a frozen phase snapshot.
    #[must_use]
    pub fn new(phases: PhaseSnapshot) -> Self {
        Self {
            builder: ChainBuilder::new(phases),
            interceptors: Mutex::new(Vec::new()),
            chain: ArcSwap::from_pointee(Chain::empty()),
        }
    }

    /// Creates a pipeline and builds its first chain.
    ///
    /// # Errors
    ///
    /// Returns the [`BuildError`] of the initial build.
    pub fn with_interceptors(
        phases: PhaseSnapshot,
        interceptors: Vec<Arc<dyn Interceptor>>,
    ) -> Result<Self, BuildError> {
        let pipeline = Self::new(phases);
        pipeline.add_all(interceptors)?;
        Ok(pipeline)
    }

    #[must_use]
    pub fn phases(&self) -> &PhaseSnapshot {
        self.builder.phases()
    }

    /// The currently published chain.
    #[must_use]
    pub fn chain(&self) -> Chain {
        Chain::clone(&self.chain.load())
    }

    /// Ids of the registered interceptors in registration order.
    #[must_use]
    pub fn interceptor_ids(&self) -> Vec<String> {
        self.interceptors
            .lock()
            .iter()
            .map(|i| i.id().to_string())
            .collect()
    }

    /// Adds one interceptor and publishes the rebuilt chain. An interceptor
    /// whose id is already registered is ignored.
    ///
    /// # Errors
    ///
    /// Returns the [`BuildError`] if the new set does not build.
    pub fn add(&self, interceptor: Arc<dyn Interceptor>) -> Result<Chain, BuildError> {
        self.add_all(vec![interceptor])
    }

    /// Adds several interceptors with a single rebuild.
    ///
    /// # Errors
    ///
    /// Returns the [`BuildError`] if the new set does not build.
    pub fn add_all(&self, interceptors: Vec<Arc<dyn Interceptor>>) -> Result<Chain, BuildError> {
        let mut current = self.interceptors.lock();
        let mut candidate = current.clone();
        for interceptor in interceptors {
            if candidate.iter().any(|i| i.id() == interceptor.id()) {
                tracing::debug!(interceptor = interceptor.id(), "interceptor already registered");
                continue;
            }
            candidate.push(interceptor);
        }
        if candidate.len() == current.len() {
            return Ok(self.chain());
        }
        self.publish(&mut current, candidate)
    }

    /// Removes the interceptor with `id` and publishes the rebuilt chain.
    /// Returns the removed interceptor, or `None` if the id is not registered.
    ///
    /// # Errors
    ///
    /// Returns the [`BuildError`] if the remaining set does not build.
    pub fn remove(&self, id: &str) -> Result<Option<Arc<dyn Interceptor>>, BuildError> {
        let mut current = self.interceptors.lock();
        let Some(position) = current.iter().position(|i| i.id() == id) else {
            return Ok(None);
        };
        let mut candidate = current.clone();
        let removed = candidate.remove(position);
        self.publish(&mut current, candidate)?;
        Ok(Some(removed))
    }

    fn publish(
        &self,
        current: &mut Vec<Arc<dyn Interceptor>>,
        candidate: Vec<Arc<dyn Interceptor>>,
    ) -> Result<Chain, BuildError> {
        let chain = self.builder.build(&candidate)?;
        *current = candidate;
        self.chain.store(Arc::new(chain.clone()));
        tracing::info!(interceptors = chain.len(), chain = ?chain, "published chain");
        Ok(chain)
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("chain", &self.chain())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use switchyard_core::{Exchange, Fault, InterceptorDescriptor, PhaseRegistry};

    use super::*;

    struct Stub(InterceptorDescriptor);

    impl Interceptor for Stub {
        fn descriptor(&self) -> &InterceptorDescriptor {
            &self.0
        }

        fn handle_message(&self, _exchange: &mut Exchange) -> Result<(), Fault> {
            Ok(())
        }
    }

    fn stub(descriptor: InterceptorDescriptor) -> Arc<dyn Interceptor> {
        Arc::new(Stub(descriptor))
    }

    fn pipeline() -> Pipeline {
        Pipeline::new(PhaseRegistry::from_sequence(["read", "invoke"]).unwrap().snapshot())
    }

    #[test]
    fn add_publishes_new_chain_and_keeps_old_handles() {
        let pipeline = pipeline();
        pipeline.add(stub(InterceptorDescriptor::new("invoke", "invoke"))).unwrap();
        let before = pipeline.chain();

        pipeline.add(stub(InterceptorDescriptor::new("log", "read"))).unwrap();
        let after = pipeline.chain();

        assert_eq!(before.ids(), vec!["invoke"]);
        assert_eq!(after.ids(), vec!["log", "invoke"]);
        assert!(!before.same_build(&after));
    }

    #[test]
    fn duplicate_add_is_ignored_without_rebuild() {
        let pipeline = pipeline();
        pipeline.add(stub(InterceptorDescriptor::new("log", "read"))).unwrap();
        let published = pipeline.chain();

        let chain = pipeline.add(stub(InterceptorDescriptor::new("log", "invoke"))).unwrap();

        assert!(chain.same_build(&published));
        assert_eq!(pipeline.interceptor_ids(), vec!["log".to_string()]);
    }

    #[test]
    fn failed_build_leaves_state_untouched() {
        let pipeline = pipeline();
        pipeline.add(stub(InterceptorDescriptor::new("a", "read").runs_before("b"))).unwrap();
        let published = pipeline.chain();

        let err = pipeline
            .add(stub(InterceptorDescriptor::new("b", "read").runs_before("a")))
            .unwrap_err();

        assert!(matches!(err, BuildError::CyclicOrdering { .. }));
        assert!(pipeline.chain().same_build(&published));
        assert_eq!(pipeline.interceptor_ids(), vec!["a".to_string()]);
    }

    #[test]
    fn remove_rebuilds_without_the_interceptor() {
        let pipeline = Pipeline::with_interceptors(
            PhaseRegistry::from_sequence(["read", "invoke"]).unwrap().snapshot(),
            vec![
                stub(InterceptorDescriptor::new("log", "read")),
                stub(InterceptorDescriptor::new("invoke", "invoke")),
            ],
        )
        .unwrap();

        let removed = pipeline.remove("log").unwrap();
        assert_eq!(removed.map(|i| i.id().to_string()).as_deref(), Some("log"));
        assert_eq!(pipeline.chain().ids(), vec!["invoke"]);
        assert!(pipeline.remove("log").unwrap().is_none());
    }
}
