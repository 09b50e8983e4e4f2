//! Rule-aware record change broadcaster.

use std::sync::Arc;

use tracing::{debug, warn};

use livebase_core::result::AppResult;
use livebase_entity::record::{Record, RecordAction};

use crate::bridge::BridgedClient;
use crate::connection::broker::Broker;
use crate::connection::client::ClientState;
use crate::connection::options::SubscriptionOptions;
use crate::message::{Message, RecordChangePayload};
use crate::metrics::RealtimeMetrics;
use crate::rules::{RecordExpander, RequestInfo, RuleEvaluator};

use super::dry_cache::DryCache;
use super::projection;
use super::topics::{self, RuleKind};

/// Turns record mutations into per-subscriber messages.
///
/// Every subscription is evaluated on its own with the subscriber's cached
/// identity. A failure for one subscription is logged and skipped.
#[derive(Debug)]
pub struct RecordChangeBroadcaster {
    broker: Arc<Broker>,
    rules: Arc<dyn RuleEvaluator>,
    expander: Arc<dyn RecordExpander>,
    dry_cache: DryCache,
    metrics: Arc<RealtimeMetrics>,
}

impl RecordChangeBroadcaster {
    /// Create a broadcaster over `broker`.
    pub fn new(
        broker: Arc<Broker>,
        rules: Arc<dyn RuleEvaluator>,
        expander: Arc<dyn RecordExpander>,
        dry_cache: DryCache,
        metrics: Arc<RealtimeMetrics>,
    ) -> Self {
        Self {
            broker,
            rules,
            expander,
            dry_cache,
            metrics,
        }
    }

    /// Pending delete messages.
    pub fn dry_cache(&self) -> &DryCache {
        &self.dry_cache
    }

    /// Publish a created record.
    pub async fn after_create(&self, record: &Record) -> usize {
        self.broadcast(RecordAction::Create, record, false).await
    }

    /// Publish an updated record.
    pub async fn after_update(&self, record: &Record) -> usize {
        self.broadcast(RecordAction::Update, record, false).await
    }

    /// Compute delete messages while the record still exists. Nothing is
    /// sent until [`RecordChangeBroadcaster::after_delete`].
    pub async fn before_delete(&self, record: &Record) -> usize {
        self.broadcast(RecordAction::Delete, record, true).await
    }

    /// Send the delete messages parked by `before_delete`.
    pub async fn after_delete(&self, record: &Record) -> usize {
        let pending = self
            .dry_cache
            .take(RecordAction::Delete, &record.collection().id, record.id())
            .await;
        let mut sent = 0;
        for (client_id, messages) in pending {
            let Some(client) = self.broker.client_by_id(client_id) else {
                continue;
            };
            for message in messages {
                client.send(message);
                sent += 1;
            }
        }
        sent
    }

    /// Forget the delete messages of a rolled back delete.
    pub async fn delete_aborted(&self, record: &Record) {
        let dropped = self
            .dry_cache
            .discard(RecordAction::Delete, &record.collection().id, record.id())
            .await;
        debug!(
            collection = %record.collection().name,
            record_id = %record.id(),
            dropped,
            "Discarded pending delete messages"
        );
    }

    /// Build the messages for `action` on `record` and either send them or,
    /// with `dry_run`, park them in the dry cache. Returns how many were
    /// produced.
    pub async fn broadcast(&self, action: RecordAction, record: &Record, dry_run: bool) -> usize {
        let prefixes = topics::prefixes(record.collection(), record.id());
        let mut produced = 0;

        for client in self.broker.clients() {
            if client.is_discarded() {
                continue;
            }
            let state = client.client().state().await;
            if state.subscriptions.is_empty() {
                continue;
            }

            for prefix in &prefixes {
                for (subscription, options) in state.matching(&prefix.prefix) {
                    let message = match self
                        .prepare(action, record, &state, prefix.rule, subscription, options)
                        .await
                    {
                        Ok(Some(message)) => message,
                        Ok(None) => continue,
                        Err(e) => {
                            self.metrics.broadcast_error();
                            warn!(
                                client_id = %client.id(),
                                subscription = %subscription,
                                error = %e,
                                "Skipping subscriber"
                            );
                            continue;
                        }
                    };

                    produced += 1;
                    self.dispatch(&client, action, record, message, dry_run).await;
                }
            }
        }

        debug!(
            action = %action,
            collection = %record.collection().name,
            record_id = %record.id(),
            produced,
            dry_run,
            "Record change broadcast"
        );
        produced
    }

    async fn dispatch(
        &self,
        client: &BridgedClient,
        action: RecordAction,
        record: &Record,
        message: Message,
        dry_run: bool,
    ) {
        if dry_run {
            self.dry_cache
                .push(client.id(), action, &record.collection().id, record.id(), message)
                .await;
        } else {
            client.send(message);
        }
    }

    /// The message for one subscription, or `None` when access is denied.
    async fn prepare(
        &self,
        action: RecordAction,
        record: &Record,
        state: &ClientState,
        rule: RuleKind,
        subscription: &str,
        options: &SubscriptionOptions,
    ) -> AppResult<Option<Message>> {
        let info = RequestInfo::for_subscriber(state.auth.clone(), options);
        let mut copy = record.clean_copy();

        if !self.can_access(&copy, rule, &info)? {
            return Ok(None);
        }
        if let Some(filter) = options.query_str("filter") {
            if !self.rules.evaluate(&filter, &copy, &info)? {
                return Ok(None);
            }
        }

        let expand = options.query_list("expand");
        if !expand.is_empty() {
            if let Err(e) = self.expander.expand(&mut copy, &expand, &info).await {
                debug!(record_id = %record.id(), error = %e, "Expand failed, sending unexpanded record");
            }
        }

        if self.can_see_hidden(&copy, &info) {
            copy.reveal_hidden(true);
        }

        let payload = serde_json::to_value(RecordChangePayload {
            action,
            record: copy.public_export(),
        })?;
        let payload = projection::pick(&payload, &options.query_list("fields"));

        Message::json(subscription, &payload).map(Some)
    }

    fn can_access(&self, record: &Record, rule: RuleKind, info: &RequestInfo) -> AppResult<bool> {
        if info.is_superuser() {
            return Ok(true);
        }
        match rule.rule(record.collection()) {
            None => Ok(false),
            Some(expression) if expression.trim().is_empty() => Ok(true),
            Some(expression) => self.rules.evaluate(expression, record, info),
        }
    }

    /// Superusers always see hidden fields. For identity records, so do the
    /// identity itself and anyone passing the manage rule.
    fn can_see_hidden(&self, record: &Record, info: &RequestInfo) -> bool {
        let Some(auth) = &info.auth else {
            return false;
        };
        if auth.is_superuser() {
            return true;
        }
        let collection = record.collection();
        if !collection.is_auth() {
            return false;
        }
        if auth.same_identity(record) {
            return true;
        }
        match collection.manage_rule.as_deref() {
            Some(expression) if expression.trim().is_empty() => true,
            Some(expression) => self
                .rules
                .evaluate(expression, record, info)
                .unwrap_or_else(|e| {
                    debug!(record_id = %record.id(), error = %e, "Manage rule failed");
                    false
                }),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tokio::sync::mpsc;

    use livebase_core::types::ChannelId;
    use livebase_entity::record::{Collection, CollectionKind, CollectionRegistry};

    use crate::bridge::{BridgeLink, MemoryBridgeTransport};
    use crate::connection::ClientState;
    use crate::connection::options::parse_subscriptions;
    use crate::rules::{BasicRuleEvaluator, NoopExpander};

    use super::*;

    const LIVE_POSTS: &str =
        "posts/*?options=%7B%22query%22%3A%7B%22filter%22%3A%22status%3D'live'%22%7D%7D";

    struct Fixture {
        broker: Arc<Broker>,
        link: BridgeLink,
        broadcaster: RecordChangeBroadcaster,
        posts: Arc<Collection>,
        notes: Arc<Collection>,
        users: Arc<Collection>,
        superusers: Arc<Collection>,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(CollectionRegistry::new());
        let posts = registry.insert(Collection::public("pbc_posts", "posts"));
        let notes = registry.insert(Collection {
            list_rule: Some("owner = @request.auth.id".to_string()),
            view_rule: None,
            ..Collection::public("pbc_notes", "notes")
        });
        let users = registry.insert(Collection {
            kind: CollectionKind::Auth,
            hidden_fields: vec!["secretNote".to_string()],
            ..Collection::public("pbc_users", "users")
        });
        let superusers = registry.insert(Collection {
            kind: CollectionKind::Auth,
            ..Collection::public("pbc_superusers", "_superusers")
        });

        let metrics = Arc::new(RealtimeMetrics::new());
        let link = BridgeLink::new(
            ChannelId::new(),
            Arc::new(MemoryBridgeTransport::standalone()),
            registry,
            Arc::clone(&metrics),
        );
        let broker = Arc::new(Broker::new());
        let broadcaster = RecordChangeBroadcaster::new(
            Arc::clone(&broker),
            Arc::new(BasicRuleEvaluator),
            Arc::new(NoopExpander),
            DryCache::new(100, Duration::from_secs(60)),
            metrics,
        );

        Fixture {
            broker,
            link,
            broadcaster,
            posts,
            notes,
            users,
            superusers,
        }
    }

    impl Fixture {
        async fn subscriber(
            &self,
            topics: &[&str],
            auth: Option<Record>,
        ) -> mpsc::Receiver<Message> {
            let (client, mailbox) = BridgedClient::new_local(self.link.clone(), 16);
            client
                .client()
                .replace_state(ClientState {
                    subscriptions: parse_subscriptions(topics).expect("valid topics"),
                    auth: auth.map(Arc::new),
                })
                .await;
            self.broker.register(Arc::new(client));
            mailbox
        }

        fn record(&self, collection: &Arc<Collection>, row: serde_json::Value) -> Record {
            Record::from_row(Arc::clone(collection), &row).expect("valid row")
        }
    }

    fn drain(mailbox: &mut mpsc::Receiver<Message>) -> Vec<Message> {
        let mut out = Vec::new();
        while let Ok(message) = mailbox.try_recv() {
            out.push(message);
        }
        out
    }

    #[tokio::test]
    async fn test_create_reaches_every_matching_subscription() {
        let fx = fixture();
        let mut mailbox = fx
            .subscriber(&["posts/*", "posts/p1", "posts/p2", "comments/*"], None)
            .await;

        let post = fx.record(&fx.posts, json!({"id": "p1", "title": "Hello"}));
        assert_eq!(fx.broadcaster.after_create(&post).await, 2);

        let mut names: Vec<String> = drain(&mut mailbox).into_iter().map(|m| m.name).collect();
        names.sort();
        assert_eq!(names, vec!["posts/*".to_string(), "posts/p1".to_string()]);
    }

    #[tokio::test]
    async fn test_payload_carries_action_and_public_record() {
        let fx = fixture();
        let mut mailbox = fx.subscriber(&["pbc_posts/p1"], None).await;

        let post = fx.record(&fx.posts, json!({"id": "p1", "title": "Hello"}));
        fx.broadcaster.after_update(&post).await;

        let messages = drain(&mut mailbox);
        assert_eq!(messages.len(), 1);
        let payload: serde_json::Value =
            serde_json::from_slice(&messages[0].data).expect("json payload");
        assert_eq!(payload["action"], json!("update"));
        assert_eq!(payload["record"]["id"], json!("p1"));
        assert_eq!(payload["record"]["collectionName"], json!("posts"));
        assert_eq!(payload["record"]["title"], json!("Hello"));
    }

    #[tokio::test]
    async fn test_list_rule_is_evaluated_against_subscriber() {
        let fx = fixture();
        let mut guest = fx.subscriber(&["notes/*"], None).await;
        let owner = fx.record(&fx.users, json!({"id": "u1"}));
        let mut owner_box = fx.subscriber(&["notes/*"], Some(owner)).await;
        let stranger = fx.record(&fx.users, json!({"id": "u2"}));
        let mut stranger_box = fx.subscriber(&["notes/*"], Some(stranger)).await;

        let note = fx.record(&fx.notes, json!({"id": "n1", "owner": "u1"}));
        assert_eq!(fx.broadcaster.after_create(&note).await, 1);

        assert!(drain(&mut guest).is_empty());
        assert!(drain(&mut stranger_box).is_empty());
        assert_eq!(drain(&mut owner_box).len(), 1);
    }

    #[tokio::test]
    async fn test_locked_rule_admits_only_superusers() {
        let fx = fixture();
        let user = fx.record(&fx.users, json!({"id": "u1"}));
        let mut user_box = fx.subscriber(&["notes/n1"], Some(user)).await;
        let root = fx.record(&fx.superusers, json!({"id": "s1"}));
        let mut root_box = fx.subscriber(&["notes/n1"], Some(root)).await;

        let note = fx.record(&fx.notes, json!({"id": "n1", "owner": "u1"}));
        fx.broadcaster.after_update(&note).await;

        assert!(drain(&mut user_box).is_empty());
        assert_eq!(drain(&mut root_box).len(), 1);
    }

    #[tokio::test]
    async fn test_filter_option_narrows_delivery() {
        let fx = fixture();
        let mut mailbox = fx.subscriber(&[LIVE_POSTS], None).await;

        let draft = fx.record(&fx.posts, json!({"id": "p1", "status": "draft"}));
        let live = fx.record(&fx.posts, json!({"id": "p2", "status": "live"}));
        fx.broadcaster.after_create(&draft).await;
        fx.broadcaster.after_create(&live).await;

        let messages = drain(&mut mailbox);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].name, LIVE_POSTS);
        assert!(messages[0].data_str().contains("\"p2\""));
    }

    #[tokio::test]
    async fn test_hidden_fields_revealed_to_owner_only() {
        let fx = fixture();
        let owner = fx.record(&fx.users, json!({"id": "u1"}));
        let mut owner_box = fx.subscriber(&["users/u1"], Some(owner)).await;
        let mut guest_box = fx.subscriber(&["users/u1"], None).await;

        let user = fx.record(&fx.users, json!({"id": "u1", "secretNote": "s"}));
        fx.broadcaster.after_update(&user).await;

        let owner_msg = drain(&mut owner_box);
        let guest_msg = drain(&mut guest_box);
        assert!(owner_msg[0].data_str().contains("secretNote"));
        assert!(!guest_msg[0].data_str().contains("secretNote"));
    }

    #[tokio::test]
    async fn test_fields_option_projects_payload() {
        let fx = fixture();
        let topic = "posts/p1?options=%7B%22query%22%3A%7B%22fields%22%3A%22record.id%22%7D%7D";
        let mut mailbox = fx.subscriber(&[topic], None).await;

        let post = fx.record(&fx.posts, json!({"id": "p1", "title": "Hello"}));
        fx.broadcaster.after_create(&post).await;

        let messages = drain(&mut mailbox);
        let payload: serde_json::Value =
            serde_json::from_slice(&messages[0].data).expect("json payload");
        assert_eq!(payload, json!({"record": {"id": "p1"}}));
    }

    #[tokio::test]
    async fn test_delete_is_sent_only_after_commit() {
        let fx = fixture();
        let mut mailbox = fx.subscriber(&["posts/*"], None).await;
        let post = fx.record(&fx.posts, json!({"id": "p1"}));

        assert_eq!(fx.broadcaster.before_delete(&post).await, 1);
        assert!(drain(&mut mailbox).is_empty());

        assert_eq!(fx.broadcaster.after_delete(&post).await, 1);
        let messages = drain(&mut mailbox);
        assert_eq!(messages.len(), 1);
        assert!(messages[0].data_str().contains("\"delete\""));

        assert_eq!(fx.broadcaster.after_delete(&post).await, 0);
    }

    #[tokio::test]
    async fn test_delete_commit_flushes_only_its_collection() {
        let fx = fixture();
        let owner = fx.record(&fx.users, json!({"id": "u1"}));
        let mut notes_box = fx.subscriber(&["notes/*"], Some(owner)).await;
        let mut posts_box = fx.subscriber(&["posts/*"], None).await;

        let note = fx.record(&fx.notes, json!({"id": "same", "owner": "u1"}));
        let post = fx.record(&fx.posts, json!({"id": "same"}));
        assert_eq!(fx.broadcaster.before_delete(&note).await, 1);
        assert_eq!(fx.broadcaster.before_delete(&post).await, 1);

        assert_eq!(fx.broadcaster.after_delete(&post).await, 1);
        assert!(drain(&mut notes_box).is_empty());
        assert_eq!(drain(&mut posts_box).len(), 1);

        fx.broadcaster.delete_aborted(&note).await;
        assert_eq!(fx.broadcaster.after_delete(&note).await, 0);
        assert!(drain(&mut notes_box).is_empty());
    }

    #[tokio::test]
    async fn test_aborted_delete_sends_nothing() {
        let fx = fixture();
        let mut mailbox = fx.subscriber(&["posts/p1"], None).await;
        let post = fx.record(&fx.posts, json!({"id": "p1"}));

        fx.broadcaster.before_delete(&post).await;
        fx.broadcaster.delete_aborted(&post).await;

        assert_eq!(fx.broadcaster.after_delete(&post).await, 0);
        assert!(drain(&mut mailbox).is_empty());
        assert!(fx.broadcaster.dry_cache().is_empty().await);
    }

    #[tokio::test]
    async fn test_broken_rule_skips_subscriber_and_counts_error() {
        let fx = fixture();
        let broken = Arc::new(Collection {
            list_rule: Some("title = = 'x'".to_string()),
            ..Collection::public("pbc_broken", "broken")
        });
        let mut mailbox = fx.subscriber(&["broken/*", "broken"], None).await;

        let record = fx.record(&broken, json!({"id": "b1", "title": "x"}));
        assert_eq!(fx.broadcaster.after_create(&record).await, 0);
        assert!(drain(&mut mailbox).is_empty());
        assert_eq!(fx.link.metrics().snapshot().broadcast_errors, 2);
    }
}
