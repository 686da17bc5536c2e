//! # msqueue - File d'attente des morceaux
//!
//! FIFO thread-safe des morceaux en attente de diffusion.
//!
//! - `push` n'est jamais bloquant
//! - `pop` attend (de manière asynchrone) qu'un élément soit disponible
//! - `remove` retire atomiquement le premier élément satisfaisant un prédicat
//! - les observateurs d'ajout/retrait sont notifiés dans l'ordre des opérations,
//!   depuis une tâche dédiée : l'événement est posté sous le verrou, l'appel
//!   de l'observateur se fait hors verrou
//!
//! ```rust,no_run
//! use msqueue::Queue;
//!
//! # async fn example() {
//! let queue = Queue::new();
//! queue.push("first");
//! queue.push("second");
//! assert_eq!(queue.pop().await, "first");
//! assert_eq!(queue.try_pop(), Some("second"));
//! # }
//! ```

use std::{
    collections::VecDeque,
    fmt,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
};

use tokio::sync::{Notify, mpsc};
use tracing::debug;

/// Observateur des mouvements de la file.
///
/// Les appels sont faits hors verrou, dans l'ordre où les opérations ont
/// été linéarisées : un retrait n'est jamais rapporté avant l'ajout
/// correspondant.
pub trait QueueObserver<T>: Send + Sync + 'static {
    fn on_enqueue(&self, item: &T);
    fn on_dequeue(&self, item: &T);
}

enum QueueEvent<T> {
    Enqueued(T),
    Dequeued(T),
}

/// File FIFO non bornée, multi-producteurs.
pub struct Queue<T> {
    items: Mutex<VecDeque<T>>,
    len: AtomicUsize,
    notify: Notify,
    events: Option<mpsc::UnboundedSender<QueueEvent<T>>>,
}

impl<T> fmt::Debug for Queue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("len", &self.len.load(Ordering::Acquire))
            .field("observed", &self.events.is_some())
            .finish()
    }
}

impl<T> Default for Queue<T>
where
    T: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Queue<T>
where
    T: Clone + Send + 'static,
{
    /// Crée une file sans observateur.
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            len: AtomicUsize::new(0),
            notify: Notify::new(),
            events: None,
        }
    }

    /// Crée une file dont les mouvements sont rapportés à `observer`.
    ///
    /// Doit être appelé depuis un runtime tokio : une tâche de dispatch est
    /// lancée et vit tant que la file existe.
    pub fn with_observer(observer: Arc<dyn QueueObserver<T>>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<QueueEvent<T>>();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    QueueEvent::Enqueued(item) => observer.on_enqueue(&item),
                    QueueEvent::Dequeued(item) => observer.on_dequeue(&item),
                }
            }
            debug!("queue observer dispatcher stopped");
        });

        Self {
            events: Some(tx),
            ..Self::new()
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// À appeler verrou tenu : l'ordre des événements est celui des opérations.
    fn emit(&self, event: impl FnOnce() -> QueueEvent<T>) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event());
        }
    }

    /// Ajoute un élément en fin de file.
    pub fn push(&self, item: T) {
        {
            let mut items = self.lock();
            self.emit(|| QueueEvent::Enqueued(item.clone()));
            items.push_back(item);
            self.len.store(items.len(), Ordering::Release);
        }
        self.notify.notify_waiters();
    }

    /// Retire la tête de file sans attendre.
    pub fn try_pop(&self) -> Option<T> {
        let mut items = self.lock();
        let item = items.pop_front()?;
        self.len.store(items.len(), Ordering::Release);
        self.emit(|| QueueEvent::Dequeued(item.clone()));
        Some(item)
    }

    /// Attend qu'un élément soit disponible puis le retire.
    pub async fn pop(&self) -> T {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // S'enregistrer avant de tester la file : aucun réveil perdu
            notified.as_mut().enable();

            if let Some(item) = self.try_pop() {
                return item;
            }
            notified.await;
        }
    }

    /// Attend que la file contienne au moins un élément, sans le retirer.
    pub async fn wait_non_empty(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if !self.is_empty() {
                return;
            }
            notified.await;
        }
    }

    /// Retire le premier élément satisfaisant `predicate`.
    pub fn remove<F>(&self, predicate: F) -> Option<T>
    where
        F: Fn(&T) -> bool,
    {
        let mut items = self.lock();
        let index = items.iter().position(predicate)?;
        let item = items.remove(index);
        self.len.store(items.len(), Ordering::Release);
        item
    }

    /// Copie cohérente du contenu, dans l'ordre FIFO.
    pub fn snapshot(&self) -> Vec<T> {
        self.lock().iter().cloned().collect()
    }

    /// Nombre d'éléments.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let queue = Queue::new();
        for i in 0..5 {
            queue.push(i);
        }
        assert_eq!(queue.len(), 5);
        let drained: Vec<_> = std::iter::from_fn(|| queue.try_pop()).collect();
        assert_eq!(drained, vec![0, 1, 2, 3, 4]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_remove_first_match_only() {
        let queue = Queue::new();
        for item in ["a", "b", "c", "b"] {
            queue.push(item);
        }
        assert_eq!(queue.remove(|x| *x == "b"), Some("b"));
        assert_eq!(queue.snapshot(), vec!["a", "c", "b"]);
        assert_eq!(queue.remove(|x| *x == "z"), None);
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn test_debug_shows_length() {
        let queue = Queue::new();
        queue.push(1u8);
        queue.push(2u8);
        assert_eq!(format!("{queue:?}"), "Queue { len: 2, observed: false }");
    }
}
