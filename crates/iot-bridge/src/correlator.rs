//! Correlator - matches asynchronous responses to the requests that caused them
//!
//! Every outstanding request owns one entry in a concurrent map keyed by its
//! request id. An entry is removed at the moment it is completed, so at most one
//! of `resolve`/`reject` ever takes effect for a given id and late or duplicate
//! responses fall through as unknown ids.
//!
//! Ids are allocated from a wrapping `u32` counter starting at 1. After wrap the
//! allocator skips 0 and any id that is still pending.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::oneshot;
use tracing::debug;

use iot_common::RequestId;
use crate::error::RpcError;

pub type Completion<T> = std::result::Result<T, RpcError>;

struct Inner<T> {
    pending: DashMap<RequestId, oneshot::Sender<Completion<T>>>,
    next_id: AtomicU32,
}

/// Table of pending requests. Cloning shares the table.
pub struct Correlator<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Correlator<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T: Send + 'static> Default for Correlator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> Correlator<T> {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    fn starting_at(first: RequestId) -> Self {
        Self {
            inner: Arc::new(Inner {
                pending: DashMap::new(),
                next_id: AtomicU32::new(first),
            }),
        }
    }

    /// Allocate an id that is not currently pending and register a completion handle for it
    pub fn create(&self) -> (RequestId, PendingResponse<T>) {
        let (tx, rx) = oneshot::channel();

        loop {
            let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
            if id == 0 {
                continue;
            }

            match self.inner.pending.entry(id) {
                Entry::Vacant(slot) => {
                    slot.insert(tx);
                    let handle = PendingResponse {
                        id,
                        rx,
                        table: Arc::downgrade(&self.inner),
                    };
                    return (id, handle);
                }
                Entry::Occupied(_) => {
                    debug!(req_id = id, "Request id still pending after wrap, skipping");
                }
            }
        }
    }

    /// Complete a pending request with a value. Returns false if the id is unknown.
    pub fn resolve(&self, id: RequestId, value: T) -> bool {
        self.complete(id, Ok(value))
    }

    /// Complete a pending request with an error. Returns false if the id is unknown.
    pub fn reject(&self, id: RequestId, error: RpcError) -> bool {
        self.complete(id, Err(error))
    }

    /// Remove a pending request without completing it; its handle yields `Cancelled`
    pub fn cancel(&self, id: RequestId) -> bool {
        self.inner.pending.remove(&id).is_some()
    }

    /// Reject every pending request with the same error, returning how many were rejected
    pub fn reject_all(&self, error: RpcError) -> usize {
        let ids: Vec<RequestId> = self.inner.pending.iter().map(|e| *e.key()).collect();
        ids.into_iter()
            .filter(|id| self.reject(*id, error.clone()))
            .count()
    }

    pub fn is_pending(&self, id: RequestId) -> bool {
        self.inner.pending.contains_key(&id)
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    fn complete(&self, id: RequestId, completion: Completion<T>) -> bool {
        match self.inner.pending.remove(&id) {
            Some((_, tx)) => {
                // The caller may have given up already; the entry is gone either way
                let _ = tx.send(completion);
                true
            }
            None => {
                debug!(req_id = id, "No pending request for id, ignoring");
                false
            }
        }
    }
}

/// Completion handle the caller awaits. Dropping it before completion frees the entry.
pub struct PendingResponse<T> {
    id: RequestId,
    rx: oneshot::Receiver<Completion<T>>,
    table: Weak<Inner<T>>,
}

impl<T> PendingResponse<T> {
    pub fn id(&self) -> RequestId {
        self.id
    }
}

impl<T> Future for PendingResponse<T> {
    type Output = Completion<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(completion)) => Poll::Ready(completion),
            Poll::Ready(Err(_)) => Poll::Ready(Err(RpcError::Cancelled)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> Drop for PendingResponse<T> {
    fn drop(&mut self) {
        self.rx.close();
        if let Some(table) = self.table.upgrade() {
            // Only our own (now closed) sender; a reused id belongs to someone else
            table.pending.remove_if(&self.id, |_, tx| tx.is_closed());
        }
    }
}
