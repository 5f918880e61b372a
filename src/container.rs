//! # Container
//!
//! A minimal type-keyed singleton registry standing in for the wiring
//! a dependency-injection framework would otherwise do. Components are
//! registered once under their concrete type and resolved by type,
//! never by name — there is no reflection here, just `TypeId` as a
//! map key.
//!
//! Anything registered that also implements [`Disposable`] is torn
//! down in registration order by [`Container::shutdown`], giving the
//! orchestrator's shutdown sequence one place to call instead of
//! threading every component handle through it individually.

use std::any::{Any, TypeId};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::errors::{ErrorKind, Result, SupervisorError};

/// Implemented by components that own a background task or other
/// resource the orchestrator must wait on before it can call the
/// process fully stopped.
#[async_trait]
pub trait Disposable: Send + Sync {
    async fn dispose(&self);
}

type AnyArc = Arc<dyn Any + Send + Sync>;

#[derive(Default)]
pub struct Container {
    singletons: dashmap::DashMap<TypeId, AnyArc>,
    disposables: Mutex<Vec<Arc<dyn Disposable>>>,
}

impl Container {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `value` under its own type. Registering the same type
    /// twice is a configuration error, not a silent overwrite — it
    /// almost always means the boot sequence wired something up twice.
    pub fn register<T: Any + Send + Sync>(&self, value: Arc<T>) -> Result<()> {
        let key = TypeId::of::<T>();
        if self.singletons.contains_key(&key) {
            return Err(SupervisorError::new(
                ErrorKind::DependencyInjectionFailed,
                format!("{} is already registered", std::any::type_name::<T>()),
            ));
        }
        self.singletons.insert(key, value);
        Ok(())
    }

    /// Resolves a previously registered singleton by type.
    pub fn resolve<T: Any + Send + Sync>(&self) -> Result<Arc<T>> {
        self.singletons
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.value().clone().downcast::<T>().ok())
            .ok_or_else(|| {
                SupervisorError::new(
                    ErrorKind::DependencyInjectionFailed,
                    format!("{} is not registered", std::any::type_name::<T>()),
                )
            })
    }

    /// Marks `disposable` for teardown when [`Container::shutdown`]
    /// runs. Independent of `register`/`resolve` so a component can be
    /// both resolvable and disposable, or disposable without ever
    /// being looked up by type.
    pub async fn register_disposable(&self, disposable: Arc<dyn Disposable>) {
        self.disposables.lock().await.push(disposable);
    }

    /// Disposes every registered singleton that implements
    /// `Disposable`, in registration order.
    pub async fn shutdown(&self) {
        let disposables = self.disposables.lock().await;
        for disposable in disposables.iter() {
            disposable.dispose().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Widget(u32);

    // A plain sync test: registration and resolution are synchronous,
    // so there's no need to spin up a full `#[tokio::test]` runtime
    // just to call into `register_disposable`, which is the only
    // `async fn` this test touches.
    #[test]
    fn register_then_resolve_round_trips() {
        let container = Container::new();
        container.register(Arc::new(Widget(7))).unwrap();
        let widget: Arc<Widget> = container.resolve().unwrap();
        assert_eq!(widget.0, 7);

        let flag = Arc::new(Flag(AtomicBool::new(false)));
        tokio_test::block_on(container.register_disposable(flag));
    }

    #[tokio::test]
    async fn resolving_an_unregistered_type_errors() {
        let container = Container::new();
        let err = container.resolve::<Widget>().unwrap_err();
        assert_eq!(err.kind, ErrorKind::DependencyInjectionFailed);
    }

    #[tokio::test]
    async fn double_registration_errors() {
        let container = Container::new();
        container.register(Arc::new(Widget(1))).unwrap();
        let err = container.register(Arc::new(Widget(2))).unwrap_err();
        assert_eq!(err.kind, ErrorKind::DependencyInjectionFailed);
    }

    struct Flag(AtomicBool);

    #[async_trait]
    impl Disposable for Flag {
        async fn dispose(&self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn shutdown_disposes_every_registered_disposable() {
        let container = Container::new();
        let flag = Arc::new(Flag(AtomicBool::new(false)));
        container.register_disposable(flag.clone()).await;
        container.shutdown().await;
        assert!(flag.0.load(Ordering::SeqCst));
    }
}
