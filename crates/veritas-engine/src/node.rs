use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tracing::error;

use veritas_core::{Config, HashId, Item, ItemChecker, ItemResult, ItemState, NodeInfo};
use veritas_ledger::Ledger;

use crate::item_cache::ItemCache;
use crate::item_lock::ItemLock;
use crate::network::{ItemNotification, ItemSource, Network, NotificationHandler};
use crate::processor::{now_ts, ItemProcessor};

fn is_terminal(state: ItemState) -> bool {
    matches!(
        state,
        ItemState::Approved
            | ItemState::Declined
            | ItemState::Revoked
            | ItemState::Undefined
            | ItemState::Discarded
    )
}

/// Whether `state` represents an actual cast opinion rather than "no
/// opinion yet" (`PENDING`) or "I don't know this id" (`UNDEFINED`,
/// `DISCARDED`, `LOCKED_FOR_CREATION`) — only the former should ever reach
/// a `VoteTally`, since the tally treats anything non-positive as a
/// negative vote.
fn is_castable_vote(state: ItemState) -> bool {
    matches!(
        state,
        ItemState::PendingPositive
            | ItemState::PendingNegative
            | ItemState::Approved
            | ItemState::Declined
            | ItemState::Revoked
    )
}

/// The per-node dispatcher: the public surface (`register_item`/`check_item`/
/// `wait_item`) plus inbound notification handling, all backed by a map of
/// live [`ItemProcessor`]s keyed by id. At most one processor exists per id
/// at a time — `ItemLock` makes the check-then-create in
/// [`Node::get_or_spawn_processor`] atomic across concurrent callers.
pub struct Node {
    self_info: NodeInfo,
    config: Arc<Config>,
    ledger: Arc<dyn Ledger>,
    network: Arc<dyn Network>,
    cache: Arc<ItemCache>,
    checker: Arc<dyn ItemChecker>,
    lock: ItemLock,
    processors: StdMutex<HashMap<HashId, Arc<ItemProcessor>>>,
}

impl Node {
    pub fn new(
        self_info: NodeInfo,
        config: Arc<Config>,
        ledger: Arc<dyn Ledger>,
        network: Arc<dyn Network>,
        checker: Arc<dyn ItemChecker>,
    ) -> Arc<Self> {
        let cache = Arc::new(ItemCache::new(config.max_cache_age));
        let node = Arc::new(Self {
            self_info,
            config,
            ledger,
            network,
            cache,
            checker,
            lock: ItemLock::new(),
            processors: StdMutex::new(HashMap::new()),
        });

        node.network
            .subscribe(Arc::new(NodeHandler(Arc::clone(&node))));

        let sweeper = Arc::clone(&node);
        tokio::spawn(async move { sweeper.run_sweeper().await });

        node
    }

    pub fn self_info(&self) -> &NodeInfo {
        &self.self_info
    }

    pub fn processor_count(&self) -> usize {
        self.processors.lock().unwrap().len()
    }

    /// Submit a new item. Discards outright (no ledger record, no processor)
    /// if it was created too long ago; otherwise starts — or joins — its
    /// consensus round.
    pub async fn register_item(self: &Arc<Self>, item: Item) -> ItemResult {
        let now = now_ts();
        let min_created_at = now - self.config.max_item_creation_age.as_secs() as i64;
        if item.created_at < min_created_at {
            return ItemResult::discarded();
        }

        let id = item.id;
        if let Some(existing) = self.processors.lock().unwrap().get(&id).cloned() {
            return existing.current_result();
        }
        if let Ok(Some(record)) = self.ledger.get_record(&id) {
            if is_terminal(record.state) {
                return ItemResult {
                    state: record.state,
                    expires_at: record.expires_at,
                    have_copy: self.cache.contains(&id),
                };
            }
        }

        match self
            .get_or_spawn_processor(id, Some(item), HashSet::new())
            .await
        {
            Some(processor) => processor.current_result(),
            None => ItemResult::undefined(),
        }
    }

    /// Current knowledge of `id`: a live processor's tally-in-progress view
    /// if one exists, otherwise whatever the ledger has on record.
    pub fn check_item(&self, id: HashId) -> ItemResult {
        if let Some(processor) = self.processors.lock().unwrap().get(&id).cloned() {
            return processor.current_result();
        }
        match self.ledger.get_record(&id) {
            Ok(Some(record)) => ItemResult {
                state: record.state,
                expires_at: record.expires_at,
                have_copy: self.cache.contains(&id),
            },
            Ok(None) => ItemResult::undefined(),
            Err(e) => {
                error!(item = %id, error = %e, "ledger lookup failed during check_item");
                ItemResult::undefined()
            }
        }
    }

    /// Block until `id` reaches a terminal state or `timeout` elapses. If no
    /// processor is tracking `id` (already settled, or never seen) this
    /// returns immediately with [`Node::check_item`]'s answer.
    pub async fn wait_item(&self, id: HashId, timeout: Duration) -> ItemResult {
        let processor = self.processors.lock().unwrap().get(&id).cloned();
        match processor {
            Some(processor) => processor.wait_done(timeout).await,
            None => self.check_item(id),
        }
    }

    /// Look up the processor for `id`, spawning one if the ledger shows an
    /// open (non-terminal) round. Always starts a processor for an unknown
    /// id — `registerItem` and an inbound notification for an id this node
    /// has never seen both autostart a round, with the download protocol
    /// fetching the body later if `initial_item` is `None`. Returns `None`
    /// only when the ledger already holds a terminal record or a ledger
    /// operation fails.
    async fn get_or_spawn_processor(
        self: &Arc<Self>,
        id: HashId,
        initial_item: Option<Item>,
        initial_sources: HashSet<NodeInfo>,
    ) -> Option<Arc<ItemProcessor>> {
        if let Some(existing) = self.processors.lock().unwrap().get(&id).cloned() {
            return Some(existing);
        }

        self.lock
            .with_lock(id, move || async move {
                if let Some(existing) = self.processors.lock().unwrap().get(&id).cloned() {
                    return Some(existing);
                }

                let now = now_ts();
                let record = match self.ledger.get_record(&id) {
                    Ok(Some(rec)) => {
                        if is_terminal(rec.state) {
                            return None;
                        }
                        rec
                    }
                    Ok(None) => match self.ledger.find_or_create(&id, now) {
                        Ok(rec) => rec,
                        Err(e) => {
                            error!(item = %id, error = %e, "find_or_create failed");
                            return None;
                        }
                    },
                    Err(e) => {
                        error!(item = %id, error = %e, "ledger lookup failed");
                        return None;
                    }
                };

                let node = Arc::clone(self);
                let on_done: Arc<dyn Fn(HashId) + Send + Sync> =
                    Arc::new(move |done_id: HashId| node.schedule_removal(done_id));

                let processor = ItemProcessor::spawn(
                    id,
                    self.self_info.clone(),
                    initial_item,
                    initial_sources,
                    record,
                    Arc::clone(&self.config),
                    Arc::clone(&self.ledger),
                    Arc::clone(&self.network),
                    Arc::clone(&self.cache),
                    Arc::clone(&self.checker),
                    on_done,
                );
                self.processors
                    .lock()
                    .unwrap()
                    .insert(id, Arc::clone(&processor));
                Some(processor)
            })
            .await
    }

    /// A finished processor stays addressable for `processor_retention`
    /// before the map forgets it, so a straggler's late vote or a client's
    /// delayed `checkItem` still sees the fresh terminal result instead of
    /// falling back to a ledger read taken moments after settlement.
    fn schedule_removal(self: &Arc<Self>, id: HashId) {
        let node = Arc::clone(self);
        let retention = self.config.processor_retention;
        tokio::spawn(async move {
            tokio::time::sleep(retention).await;
            node.processors.lock().unwrap().remove(&id);
        });
    }

    async fn run_sweeper(self: Arc<Self>) {
        let interval = self.config.poll_time.max(Duration::from_secs(1));
        loop {
            tokio::time::sleep(interval).await;
            self.cache.sweep();
            self.lock.sweep();
        }
    }

    async fn dispatch_notification(self: &Arc<Self>, notification: ItemNotification) {
        let id = notification.item_id;
        let from = notification.from.clone();
        let have_copy = notification.result.have_copy;

        let mut sources = HashSet::new();
        if have_copy {
            sources.insert(from.clone());
        }

        let processor = self.get_or_spawn_processor(id, None, sources).await;
        let (reply_result, request_answer) = match &processor {
            Some(processor) => {
                if have_copy {
                    processor.add_source(from.clone()).await;
                }
                if is_castable_vote(notification.result.state) {
                    processor.vote(from.clone(), notification.result.state).await;
                }
                let request_answer = !processor.has_voted(&from).await;
                (processor.current_result(), request_answer)
            }
            None => (self.check_item(id), false),
        };

        let reply = ItemNotification {
            from: self.self_info.clone(),
            item_id: id,
            result: reply_result,
            request_answer,
        };
        self.network.deliver(&from, reply).await;
    }
}

impl ItemSource for Node {
    fn get_item(&self, id: &HashId) -> Option<Item> {
        if let Some(item) = self.cache.get(id) {
            return Some(item);
        }
        self.processors
            .lock()
            .unwrap()
            .get(id)
            .and_then(|processor| processor.body())
    }
}

/// Thin `Arc<Node>`-holding adapter so `Node`'s notification handling can use
/// `self: &Arc<Self>` receivers (needed to spawn the retention-sweep task)
/// while still satisfying `NotificationHandler`'s plain `&self`.
struct NodeHandler(Arc<Node>);

#[async_trait]
impl NotificationHandler for NodeHandler {
    async fn handle(&self, notification: ItemNotification) {
        self.0.dispatch_notification(notification).await;
    }
}
