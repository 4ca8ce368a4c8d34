//! Packet listeners and the dispatcher that runs them.
//!
//! A [`Dispatcher`] holds listeners keyed by direction and packet-kind filter.
//! For each packet it selects the matching listeners in registration order
//! and runs them as spawned tasks, either one after another
//! ([`DispatchMode::Sequential`]) or all at once ([`DispatchMode::Concurrent`]).
//! In both modes `dispatch` returns only after every task has settled.
//!
//! A [`ListenerChain`] is a single registration with per-kind overrides: for
//! any packet it contributes at most one handler, the override for that exact
//! kind if there is one, otherwise its default.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use smo_protocol::{Packet, PacketKind};
use tokio::task::{JoinError, JoinSet};

use crate::HandlerError;

/// Boxed future returned by a handler.
pub type HandlerFuture<R> = Pin<Box<dyn Future<Output = Result<R, HandlerError>> + Send>>;

/// A packet listener: context plus shared packet in, result out.
pub type Handler<C, R> = Arc<dyn Fn(C, Arc<Packet>) -> HandlerFuture<R> + Send + Sync>;

/// Wrap an async closure as a [`Handler`].
pub fn handler<C, R, F, Fut>(f: F) -> Handler<C, R>
where
    F: Fn(C, Arc<Packet>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, HandlerError>> + Send + 'static,
{
    Arc::new(move |ctx, packet| Box::pin(f(ctx, packet)))
}

/// Which packets a listener wants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketFilter {
    /// Every packet, including unknown kinds.
    Any,
    /// Only the listed kinds.
    Kinds(Vec<PacketKind>),
}

impl PacketFilter {
    pub fn matches(&self, kind: PacketKind) -> bool {
        match self {
            PacketFilter::Any => true,
            PacketFilter::Kinds(kinds) => kinds.contains(&kind),
        }
    }
}

impl From<PacketKind> for PacketFilter {
    fn from(kind: PacketKind) -> Self {
        PacketFilter::Kinds(vec![kind])
    }
}

impl<const N: usize> From<[PacketKind; N]> for PacketFilter {
    fn from(kinds: [PacketKind; N]) -> Self {
        PacketFilter::Kinds(kinds.to_vec())
    }
}

/// Whether a listener sees packets read from the peer or packets written to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Incoming,
    Outgoing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    /// Each listener finishes before the next starts.
    #[default]
    Sequential,
    /// All listeners run together; the batch ends when the slowest does.
    Concurrent,
}

/// Handle returned by registration, for [`Dispatcher::unregister`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// A default handler plus exact-kind overrides.
pub struct ListenerChain<C, R> {
    filter: PacketFilter,
    default: Handler<C, R>,
    overrides: HashMap<PacketKind, Handler<C, R>>,
}

impl<C, R> ListenerChain<C, R> {
    /// `default` runs for packets matching `filter` that have no override.
    pub fn new(filter: impl Into<PacketFilter>, default: Handler<C, R>) -> Self {
        Self {
            filter: filter.into(),
            default,
            overrides: HashMap::new(),
        }
    }

    /// Use `handler` instead of the default for packets of `kind`.
    pub fn with_override(mut self, kind: PacketKind, handler: Handler<C, R>) -> Self {
        self.overrides.insert(kind, handler);
        self
    }

    fn resolve(&self, kind: PacketKind) -> Option<&Handler<C, R>> {
        self.overrides
            .get(&kind)
            .or_else(|| self.filter.matches(kind).then_some(&self.default))
    }
}

enum Listener<C, R> {
    Single {
        filter: PacketFilter,
        handler: Handler<C, R>,
    },
    Chain(ListenerChain<C, R>),
}

struct Entry<C, R> {
    id: ListenerId,
    direction: Direction,
    listener: Listener<C, R>,
}

/// Listener registry and runner.
pub struct Dispatcher<C, R> {
    entries: RwLock<Vec<Entry<C, R>>>,
    next_id: AtomicU64,
}

impl<C, R> Dispatcher<C, R>
where
    C: Clone + Send + 'static,
    R: Send + 'static,
{
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn push(&self, direction: Direction, listener: Listener<C, R>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.write().push(Entry {
            id,
            direction,
            listener,
        });
        id
    }

    pub fn register(
        &self,
        filter: impl Into<PacketFilter>,
        direction: Direction,
        handler: Handler<C, R>,
    ) -> ListenerId {
        self.push(
            direction,
            Listener::Single {
                filter: filter.into(),
                handler,
            },
        )
    }

    pub fn register_chain(&self, direction: Direction, chain: ListenerChain<C, R>) -> ListenerId {
        self.push(direction, Listener::Chain(chain))
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn unregister(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        entries.len() != before
    }

    /// Handlers that apply to `packet`, in registration order.
    pub fn listeners_for(&self, packet: &Packet, direction: Direction) -> Vec<Handler<C, R>> {
        let kind = packet.kind();
        self.entries
            .read()
            .iter()
            .filter(|entry| entry.direction == direction)
            .filter_map(|entry| match &entry.listener {
                Listener::Single { filter, handler } => filter.matches(kind).then_some(handler),
                Listener::Chain(chain) => chain.resolve(kind),
            })
            .cloned()
            .collect()
    }

    /// Run every matching listener for `packet` and collect their results.
    ///
    /// Failed or panicked listeners are logged and left out of the result;
    /// they never affect the others. Returns after all listeners settle.
    pub async fn dispatch(
        &self,
        ctx: C,
        packet: Arc<Packet>,
        direction: Direction,
        mode: DispatchMode,
    ) -> Vec<R> {
        let handlers = self.listeners_for(&packet, direction);
        if handlers.is_empty() {
            return Vec::new();
        }
        tracing::trace!(
            "Dispatching {} {direction:?} to {} listeners ({mode:?})",
            packet.kind().name(),
            handlers.len()
        );

        let mut results = Vec::with_capacity(handlers.len());
        match mode {
            DispatchMode::Sequential => {
                for handler in handlers {
                    let task = tokio::spawn(handler(ctx.clone(), Arc::clone(&packet)));
                    if let Some(value) = settle(&packet, task.await) {
                        results.push(value);
                    }
                }
            }
            DispatchMode::Concurrent => {
                let mut tasks = JoinSet::new();
                for handler in handlers {
                    tasks.spawn(handler(ctx.clone(), Arc::clone(&packet)));
                }
                while let Some(joined) = tasks.join_next().await {
                    if let Some(value) = settle(&packet, joined) {
                        results.push(value);
                    }
                }
            }
        }
        results
    }
}

impl<C, R> Default for Dispatcher<C, R>
where
    C: Clone + Send + 'static,
    R: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

fn settle<R>(packet: &Packet, joined: Result<Result<R, HandlerError>, JoinError>) -> Option<R> {
    match joined {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            tracing::error!("Listener for {} failed: {e}", packet.kind().name());
            None
        }
        Err(e) if e.is_panic() => {
            tracing::error!("Listener for {} panicked", packet.kind().name());
            None
        }
        Err(e) => {
            tracing::error!("Listener for {} was cancelled: {e}", packet.kind().name());
            None
        }
    }
}
