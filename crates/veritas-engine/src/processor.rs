use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tracing::{debug, error, info, warn};

use veritas_core::{Config, HashId, Item, ItemChecker, ItemError, ItemResult, ItemState, NodeInfo, Timestamp};
use veritas_ledger::{Ledger, StateRecordData};

use crate::event::OnceEvent;
use crate::item_cache::ItemCache;
use crate::network::{ItemNotification, Network};
use crate::vote_tally::{Consensus, VoteTally};

pub(crate) fn now_ts() -> Timestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs() as Timestamp
}

/// Per-item state machine: download the body if absent, validate and lock
/// against the ledger, accumulate peer votes, and commit or roll back once a
/// quorum is reached. One processor exists per `HashId` at a time — the
/// invariant is enforced by `Node`, not by this type.
///
/// All collaborators (ledger, network, cache, checker, config) are explicit
/// `Arc`-shared handles rather than a back-pointer into `Node`; `on_done` is
/// the completion callback `Node` uses to remove this processor from its
/// map, so the processor never needs to know about the map that holds it.
pub struct ItemProcessor {
    id: HashId,
    self_info: NodeInfo,
    config: Arc<Config>,
    ledger: Arc<dyn Ledger>,
    network: Arc<dyn Network>,
    cache: Arc<ItemCache>,
    checker: Arc<dyn ItemChecker>,
    on_done: Arc<dyn Fn(HashId) + Send + Sync>,

    item: Mutex<Option<Item>>,
    record: Mutex<StateRecordData>,
    sources: AsyncMutex<HashSet<NodeInfo>>,
    tally: AsyncMutex<VoteTally>,
    locked_to_revoke: Mutex<Vec<StateRecordData>>,
    locked_to_create: Mutex<Vec<StateRecordData>>,
    expires_at: Mutex<Timestamp>,

    download_notify: Notify,
    downloaded_event: OnceEvent,
    done_event: OnceEvent,
}

impl ItemProcessor {
    /// Construct and immediately spawn the processor's lifecycle task.
    /// `initial_item` is the body supplied at registration (client submit),
    /// if any; `initial_sources` are peers already known to have a copy
    /// (e.g. the `from` of an inbound notification with `have_copy = true`).
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        id: HashId,
        self_info: NodeInfo,
        initial_item: Option<Item>,
        initial_sources: HashSet<NodeInfo>,
        initial_record: StateRecordData,
        config: Arc<Config>,
        ledger: Arc<dyn Ledger>,
        network: Arc<dyn Network>,
        cache: Arc<ItemCache>,
        checker: Arc<dyn ItemChecker>,
        on_done: Arc<dyn Fn(HashId) + Send + Sync>,
    ) -> Arc<Self> {
        let body = initial_item.or_else(|| cache.get(&id));
        let processor = Arc::new(Self {
            id,
            self_info,
            config: Arc::clone(&config),
            ledger,
            network,
            cache,
            checker,
            on_done,
            item: Mutex::new(body),
            record: Mutex::new(initial_record),
            sources: AsyncMutex::new(initial_sources),
            tally: AsyncMutex::new(VoteTally::new(
                config.positive_consensus,
                config.negative_consensus,
            )),
            locked_to_revoke: Mutex::new(Vec::new()),
            locked_to_create: Mutex::new(Vec::new()),
            expires_at: Mutex::new(now_ts() + config.max_cache_age.as_secs() as Timestamp),
            download_notify: Notify::new(),
            downloaded_event: OnceEvent::new(),
            done_event: OnceEvent::new(),
        });

        let run = Arc::clone(&processor);
        tokio::spawn(async move { run.run_lifecycle().await });
        processor
    }

    pub fn id(&self) -> HashId {
        self.id
    }

    pub fn current_result(&self) -> ItemResult {
        let record = self.record.lock().unwrap();
        let have_copy = self.item.lock().unwrap().is_some() || self.cache.contains(&self.id);
        ItemResult {
            state: record.state,
            expires_at: record.expires_at,
            have_copy,
        }
    }

    pub async fn done_event(&self) -> &OnceEvent {
        &self.done_event
    }

    /// The body this processor currently holds, if any — used by `Node`'s
    /// `ItemSource` implementation to answer peer `get_item` requests for
    /// items still in flight (not yet in the shared cache).
    pub fn body(&self) -> Option<Item> {
        self.item.lock().unwrap().clone()
    }

    pub fn is_done(&self) -> bool {
        self.done_event.is_fired()
    }

    pub async fn wait_done(&self, timeout: Duration) -> ItemResult {
        self.done_event.wait_timeout(timeout).await;
        self.current_result()
    }

    /// Record `peer`'s vote and trigger consensus if a threshold is now met.
    pub async fn vote(self: &Arc<Self>, peer: NodeInfo, state: ItemState) {
        let outcome = {
            let mut tally = self.tally.lock().await;
            tally.record(peer, state)
        };
        self.act_on_consensus(outcome).await;
    }

    pub async fn has_voted(&self, peer: &NodeInfo) -> bool {
        self.tally.lock().await.has_voted(peer)
    }

    /// Add a peer known to hold a copy of the item. If the processor is
    /// still waiting on a download, this wakes it immediately rather than
    /// waiting out the current poll interval.
    pub async fn add_source(&self, peer: NodeInfo) {
        let mut sources = self.sources.lock().await;
        let inserted = sources.insert(peer);
        drop(sources);
        if inserted {
            self.download_notify.notify_one();
        }
    }

    async fn act_on_consensus(self: &Arc<Self>, outcome: Option<Consensus>) {
        match outcome {
            Some(Consensus::Negative) => self.rollback(ItemState::Declined).await,
            Some(Consensus::Positive) => self.commit().await,
            None => {}
        }
    }

    fn is_expired(&self) -> bool {
        now_ts() >= *self.expires_at.lock().unwrap()
    }

    fn remaining_time(&self) -> Duration {
        let deadline = *self.expires_at.lock().unwrap();
        let remaining = deadline - now_ts();
        if remaining <= 0 {
            Duration::ZERO
        } else {
            Duration::from_secs(remaining as u64)
        }
    }

    // ── lifecycle ────────────────────────────────────────────────────────────

    async fn run_lifecycle(self: Arc<Self>) {
        let have_body = self.item.lock().unwrap().is_some();
        if !have_body && !self.acquire_body_via_download().await {
            // Expired (or already terminal) before a body was ever obtained;
            // `acquire_body_via_download` already performed the rollback.
            return;
        }
        if self.done_event.is_fired() {
            return;
        }
        self.local_check().await;
        if !self.done_event.is_fired() {
            self.poll_loop().await;
        }
    }

    /// Downloader task. Picks a uniformly random source, fetches with a
    /// per-attempt timeout, and reschedules on failure or an empty source
    /// set. A new source arriving wakes the wait immediately. Returns
    /// `true` once a body has been obtained and cached.
    async fn acquire_body_via_download(self: &Arc<Self>) -> bool {
        loop {
            if self.done_event.is_fired() {
                return false;
            }
            if self.is_expired() {
                self.rollback(ItemState::Undefined).await;
                return false;
            }

            let candidate = {
                let sources = self.sources.lock().await;
                if sources.is_empty() {
                    None
                } else {
                    let idx = rand::thread_rng().gen_range(0..sources.len());
                    sources.iter().nth(idx).cloned()
                }
            };

            let Some(peer) = candidate else {
                self.wait_for_reschedule().await;
                continue;
            };

            match self
                .network
                .get_item(self.id, &peer, self.config.max_get_item_time)
                .await
            {
                Ok(Some(item)) => {
                    self.cache.put(item.clone());
                    *self.item.lock().unwrap() = Some(item);
                    return true;
                }
                Ok(None) => {
                    debug!(item = %self.id, peer = %peer.id, "peer had no copy");
                    self.wait_for_reschedule().await;
                }
                Err(e) => {
                    debug!(item = %self.id, peer = %peer.id, error = %e, "download attempt failed");
                    self.wait_for_reschedule().await;
                }
            }
        }
    }

    async fn wait_for_reschedule(self: &Arc<Self>) {
        tokio::select! {
            _ = tokio::time::sleep(self.config.poll_time) => {}
            _ = self.download_notify.notified() => {}
        }
    }

    /// Synchronous (non-suspending) validation and conditional locking.
    /// Runs exactly once, right after the body becomes available.
    async fn local_check(self: &Arc<Self>) {
        let mut item = self
            .item
            .lock()
            .unwrap()
            .clone()
            .expect("body must be present before local_check");

        let mut locked_to_revoke = Vec::new();
        let mut locked_to_create = Vec::new();
        let mut new_errors = Vec::new();

        if self.checker.check(&mut item) {
            for ref_id in &item.references {
                match self.ledger.is_approved(ref_id) {
                    Ok(true) => {}
                    Ok(false) => new_errors.push(ItemError::BadRef),
                    Err(e) => {
                        warn!(item = %self.id, error = %e, "ledger lookup failed during check");
                        new_errors.push(ItemError::BadRef);
                    }
                }
            }

            for revoke_id in &item.revokes {
                match self.ledger.lock_to_revoke(revoke_id, self.id) {
                    Ok(Some(rec)) => locked_to_revoke.push(rec),
                    Ok(None) => new_errors.push(ItemError::BadRevoke),
                    Err(e) => {
                        warn!(item = %self.id, error = %e, "lock_to_revoke failed");
                        new_errors.push(ItemError::BadRevoke);
                    }
                }
            }

            for new_item in item.new_items.iter_mut() {
                if !self.checker.check(new_item) {
                    new_errors.push(ItemError::BadNewItem);
                    continue;
                }
                match self
                    .ledger
                    .create_output_lock_record(&new_item.id, self.id, now_ts())
                {
                    Ok(Some(rec)) => locked_to_create.push(rec),
                    Ok(None) => new_errors.push(ItemError::NewItemExists),
                    Err(e) => {
                        warn!(item = %self.id, error = %e, "create_output_lock_record failed");
                        new_errors.push(ItemError::NewItemExists);
                    }
                }
            }
        }
        item.errors.extend(new_errors);

        let own_vote = if item.is_valid_so_far() {
            ItemState::PendingPositive
        } else {
            ItemState::PendingNegative
        };

        {
            let mut record = self.record.lock().unwrap();
            record.set_state(own_vote);
            record.set_expires_at(item.expires_at);
        }
        let record_snapshot = self.record.lock().unwrap().clone();
        if let Err(e) = self.ledger.save(&record_snapshot) {
            error!(item = %self.id, error = %e, "failed to persist local check result");
        }

        *self.locked_to_revoke.lock().unwrap() = locked_to_revoke;
        *self.locked_to_create.lock().unwrap() = locked_to_create;
        *self.item.lock().unwrap() = Some(item);

        let outcome = {
            let mut tally = self.tally.lock().await;
            tally.record(self.self_info.clone(), own_vote)
        };
        self.broadcast_current_state(true).await;
        self.act_on_consensus(outcome).await;
    }

    async fn poll_loop(self: Arc<Self>) {
        loop {
            if self.done_event.is_fired() {
                return;
            }
            tokio::time::sleep(self.config.poll_time).await;
            if self.done_event.is_fired() {
                return;
            }
            if self.is_expired() {
                self.rollback(ItemState::Undefined).await;
                return;
            }
            self.retransmit().await;
        }
    }

    /// Retransmission/recovery against lost messages: every peer not yet
    /// recorded in either vote set gets another copy of our current state,
    /// with `request_answer = true`.
    async fn retransmit(self: &Arc<Self>) {
        let result = self.current_result();
        for peer in self.network.peers() {
            if self.has_voted(&peer).await {
                continue;
            }
            let notification = ItemNotification {
                from: self.self_info.clone(),
                item_id: self.id,
                result: result.clone(),
                request_answer: true,
            };
            self.network.deliver(&peer, notification).await;
        }
    }

    async fn broadcast_current_state(self: &Arc<Self>, request_answer: bool) {
        let notification = ItemNotification {
            from: self.self_info.clone(),
            item_id: self.id,
            result: self.current_result(),
            request_answer,
        };
        self.network
            .broadcast(&self.self_info, notification)
            .await;
    }

    // ── terminal transitions ─────────────────────────────────────────────────

    async fn commit(self: &Arc<Self>) {
        {
            let mut record = self.record.lock().unwrap();
            record.set_state(ItemState::Approved);
        }

        let have_body = self.item.lock().unwrap().is_some();
        if !have_body {
            {
                let mut deadline = self.expires_at.lock().unwrap();
                *deadline = now_ts() + self.config.max_download_on_approve_time.as_secs() as Timestamp;
            }
            for peer in self.network.peers() {
                self.add_source(peer).await;
            }
            self.download_notify.notify_one();

            let remaining = self.remaining_time();
            let arrived = self.downloaded_event.wait_timeout(remaining).await;
            if !arrived {
                warn!(item = %self.id, "body unavailable within approval window, discarding");
                let _ = self.ledger.destroy(&self.id);
                {
                    let mut record = self.record.lock().unwrap();
                    record.set_state(ItemState::Undefined);
                }
                self.finish();
                return;
            }
        }

        let item = self
            .item
            .lock()
            .unwrap()
            .clone()
            .expect("body present after download wait");
        let _ = std::mem::take(&mut *self.locked_to_revoke.lock().unwrap());
        let _ = std::mem::take(&mut *self.locked_to_create.lock().unwrap());

        let now = now_ts();
        let revoked_expiry = now + self.config.revoked_item_expiration.as_secs() as Timestamp;

        let txn_result = self.ledger.transaction(&mut |txn| {
            for revoke_id in &item.revokes {
                let mut rec = txn.find_or_create(revoke_id, now)?;
                rec.set_state(ItemState::Revoked);
                rec.set_expires_at(revoked_expiry);
                txn.save(&rec)?;
            }
            for new_item in &item.new_items {
                let mut rec = txn.find_or_create(&new_item.id, now)?;
                rec.set_state(ItemState::Approved);
                rec.set_expires_at(new_item.expires_at);
                txn.save(&rec)?;
            }
            Ok(())
        });

        match txn_result {
            Ok(()) => info!(item = %self.id, "item committed"),
            Err(e) => error!(item = %self.id, error = %e, "ledger transaction failed during commit"),
        }

        self.finish();
    }

    async fn rollback(self: &Arc<Self>, new_state: ItemState) {
        let locked_to_revoke = std::mem::take(&mut *self.locked_to_revoke.lock().unwrap());
        let locked_to_create = std::mem::take(&mut *self.locked_to_create.lock().unwrap());

        let now = now_ts();
        let retention = if new_state == ItemState::Revoked {
            self.config.revoked_item_expiration
        } else {
            self.config.declined_item_expiration
        };
        let expiry = now + retention.as_secs() as Timestamp;
        let id = self.id;

        let txn_result = self.ledger.transaction(&mut |txn| {
            for rec in &locked_to_revoke {
                txn.unlock(&rec.id)?;
            }
            for rec in &locked_to_create {
                txn.unlock(&rec.id)?;
            }
            let mut rec = txn.find_or_create(&id, now)?;
            rec.set_state(new_state);
            rec.set_expires_at(expiry);
            txn.save(&rec)?;
            Ok(())
        });

        match txn_result {
            Ok(()) => info!(item = %self.id, state = ?new_state, "item rolled back"),
            Err(e) => error!(item = %self.id, error = %e, "ledger transaction failed during rollback"),
        }

        {
            let mut record = self.record.lock().unwrap();
            record.set_state(new_state);
            record.set_expires_at(expiry);
        }
        self.finish();
    }

    fn finish(self: &Arc<Self>) {
        self.done_event.fire();
        (self.on_done)(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration as StdDuration;
    use veritas_core::AlwaysValidChecker;
    use veritas_ledger::SledLedger;

    struct NullNetwork;

    #[async_trait]
    impl Network for NullNetwork {
        fn subscribe(&self, _handler: Arc<dyn crate::network::NotificationHandler>) {}
        async fn deliver(&self, _peer: &NodeInfo, _notification: ItemNotification) {}
        async fn broadcast(&self, _origin: &NodeInfo, _notification: ItemNotification) {}
        fn peers(&self) -> Vec<NodeInfo> {
            Vec::new()
        }
        async fn get_item(
            &self,
            _id: HashId,
            _peer: &NodeInfo,
            _timeout: Duration,
        ) -> Result<Option<Item>, veritas_core::EngineError> {
            Ok(None)
        }
    }

    fn test_config() -> Arc<Config> {
        let mut cfg = Config::default();
        cfg.positive_consensus = 3;
        cfg.negative_consensus = 2;
        cfg.poll_time = StdDuration::from_millis(20);
        cfg.max_cache_age = StdDuration::from_secs(60);
        Arc::new(cfg)
    }

    fn peer(tag: &[u8]) -> NodeInfo {
        NodeInfo::new(HashId::of(tag), "peer".to_string())
    }

    fn harness(item: Item) -> (Arc<ItemProcessor>, Arc<dyn Ledger>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let ledger: Arc<dyn Ledger> = Arc::new(SledLedger::open(dir.path()).unwrap());
        let config = test_config();
        let cache = Arc::new(ItemCache::new(config.max_cache_age));
        let self_info = peer(b"self");
        let initial_record = ledger.find_or_create(&item.id, now_ts()).unwrap();
        let processor = ItemProcessor::spawn(
            item.id,
            self_info,
            Some(item),
            HashSet::new(),
            initial_record,
            config,
            Arc::clone(&ledger),
            Arc::new(NullNetwork),
            cache,
            Arc::new(AlwaysValidChecker),
            Arc::new(|_id| {}),
        );
        (processor, ledger, dir)
    }

    #[tokio::test]
    async fn happy_path_commits_and_approves_new_item() {
        let new_item = Item::new(HashId::of(b"new-item"), now_ts(), now_ts() + 1000);
        let item = Item::new(HashId::of(b"x"), now_ts(), now_ts() + 1000)
            .with_new_items(vec![new_item.clone()]);
        let (processor, ledger, _dir) = harness(item);

        // Give local_check a moment to run and record our own positive vote.
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        processor.vote(peer(b"B"), ItemState::PendingPositive).await;
        let result = processor.wait_done(StdDuration::from_secs(2)).await;

        assert_eq!(result.state, ItemState::Approved);
        assert_eq!(
            ledger.get_record(&new_item.id).unwrap().unwrap().state,
            ItemState::Approved
        );
    }

    #[tokio::test]
    async fn bad_ref_votes_negative_and_rolls_back_on_quorum() {
        let item = Item::new(HashId::of(b"y"), now_ts(), now_ts() + 1000)
            .with_references(vec![HashId::of(b"unknown-ref")]);
        let (processor, ledger, _dir) = harness(item.clone());

        tokio::time::sleep(StdDuration::from_millis(20)).await;
        processor.vote(peer(b"B"), ItemState::PendingNegative).await;
        let result = processor.wait_done(StdDuration::from_secs(2)).await;

        assert_eq!(result.state, ItemState::Declined);
        assert_eq!(
            ledger.get_record(&item.id).unwrap().unwrap().state,
            ItemState::Declined
        );
    }

    #[tokio::test]
    async fn double_revoke_conflict_only_one_locks() {
        let dir = tempfile::tempdir().unwrap();
        let ledger: Arc<dyn Ledger> = Arc::new(SledLedger::open(dir.path()).unwrap());
        let target = HashId::of(b"target");
        ledger
            .save(&StateRecordData {
                id: target,
                state: ItemState::Approved,
                expires_at: now_ts() + 1000,
                locked_by: None,
            })
            .unwrap();

        let config = test_config();
        let cache = Arc::new(ItemCache::new(config.max_cache_age));
        let self_info = peer(b"self");

        let p_item = Item::new(HashId::of(b"p"), now_ts(), now_ts() + 1000)
            .with_revokes(vec![target]);
        let q_item = Item::new(HashId::of(b"q"), now_ts(), now_ts() + 1000)
            .with_revokes(vec![target]);

        let make = |item: Item| {
            let rec = ledger.find_or_create(&item.id, now_ts()).unwrap();
            ItemProcessor::spawn(
                item.id,
                self_info.clone(),
                Some(item),
                HashSet::new(),
                rec,
                Arc::clone(&config),
                Arc::clone(&ledger),
                Arc::new(NullNetwork) as Arc<dyn Network>,
                Arc::clone(&cache),
                Arc::new(AlwaysValidChecker) as Arc<dyn ItemChecker>,
                Arc::new(|_id| {}) as Arc<dyn Fn(HashId) + Send + Sync>,
            )
        };

        let p = make(p_item.clone());
        let q = make(q_item.clone());

        tokio::time::sleep(StdDuration::from_millis(30)).await;

        let p_state = ledger.get_record(&p_item.id).unwrap().unwrap().state;
        let q_state = ledger.get_record(&q_item.id).unwrap().unwrap().state;
        // Exactly one of the two must have locked the target (positive vote so far).
        let winners = [p_state, q_state]
            .iter()
            .filter(|s| **s == ItemState::PendingPositive)
            .count();
        assert_eq!(winners, 1, "exactly one revoker should win the lock");
        let _ = (p, q);
    }

    #[tokio::test]
    async fn expiration_rolls_back_undefined() {
        let mut cfg = test_config();
        Arc::get_mut(&mut cfg).unwrap().max_cache_age = StdDuration::from_millis(30);
        let dir = tempfile::tempdir().unwrap();
        let ledger: Arc<dyn Ledger> = Arc::new(SledLedger::open(dir.path()).unwrap());
        let cache = Arc::new(ItemCache::new(cfg.max_cache_age));
        let self_info = peer(b"self");
        let id = HashId::of(b"w");
        let rec = ledger.find_or_create(&id, now_ts()).unwrap();

        // No body and no sources: the downloader can never complete, so the
        // processor must expire via maxCacheAge.
        let processor = ItemProcessor::spawn(
            id,
            self_info,
            None,
            HashSet::new(),
            rec,
            cfg,
            Arc::clone(&ledger),
            Arc::new(NullNetwork),
            cache,
            Arc::new(AlwaysValidChecker),
            Arc::new(|_id| {}),
        );

        let result = processor.wait_done(StdDuration::from_secs(2)).await;
        assert_eq!(result.state, ItemState::Undefined);
    }

    #[tokio::test]
    async fn vote_after_done_changes_nothing() {
        let item = Item::new(HashId::of(b"z"), now_ts(), now_ts() + 1000);
        let (processor, _ledger, _dir) = harness(item);

        tokio::time::sleep(StdDuration::from_millis(20)).await;
        processor.vote(peer(b"B"), ItemState::PendingPositive).await;
        processor.vote(peer(b"C"), ItemState::PendingPositive).await;
        let first = processor.wait_done(StdDuration::from_secs(2)).await;
        assert_eq!(first.state, ItemState::Approved);

        processor.vote(peer(b"D"), ItemState::PendingNegative).await;
        let after = processor.current_result();
        assert_eq!(after.state, ItemState::Approved);
    }
}
