// Integration tests for the actor runtime public surface.

use troupe::{
    ActorContext, ActorSystem, Behavior, BehaviorRegistry, BehaviorSpec,
    ConfigSource, CreateOptions, Error, HandlerTable, SystemOptions,
};

use async_trait::async_trait;
use serde_json::{json, Value};

use tracing_test::traced_test;

use std::{
    collections::HashSet,
    io::Write,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

// Defines a counting behavior in the trait form.
struct Counter {
    count: i64,
    step: i64,
}

#[async_trait]
impl Behavior for Counter {
    async fn initialize(&mut self, _ctx: &ActorContext) -> Result<(), Error> {
        // The step is fixed during initialization; handlers rely on it.
        self.step = 2;
        Ok(())
    }

    async fn handle(
        &mut self,
        topic: &str,
        _payload: Value,
        _ctx: &ActorContext,
    ) -> Result<Option<Value>, Error> {
        match topic {
            "bump" => {
                self.count += self.step;
                Ok(None)
            }
            "count" => Ok(Some(json!(self.count))),
            other => Err(Error::Handler(format!(
                "no handler for topic '{}'",
                other
            ))),
        }
    }
}

async fn fresh_system() -> (ActorSystem, troupe::ActorRef) {
    let system = ActorSystem::new(SystemOptions::default());
    let root = system.root_actor().await.unwrap();
    (system, root)
}

fn echo_table() -> HandlerTable {
    HandlerTable::new("echo")
        .handler("echo", |payload, _ctx| async move { Ok(Some(payload)) })
}

#[tokio::test]
async fn test_echo_in_memory() {
    let (_system, root) = fresh_system().await;
    let echo = root
        .create_child(
            BehaviorSpec::definition(echo_table()),
            CreateOptions::default(),
        )
        .await
        .unwrap();
    let reply = echo.ask("echo", json!(42)).await.unwrap();
    assert_eq!(reply, json!(42));
}

#[tokio::test]
async fn test_state_survives_initialize_and_messages() {
    let (_system, root) = fresh_system().await;
    let counter = root
        .create_child(
            BehaviorSpec::definition(Counter { count: 0, step: 0 }),
            CreateOptions::default(),
        )
        .await
        .unwrap();

    counter.tell("bump", Value::Null).await.unwrap();
    counter.tell("bump", Value::Null).await.unwrap();
    // Handlers run strictly after the initialize hook fixed the step.
    let count = counter.ask("count", Value::Null).await.unwrap();
    assert_eq!(count, json!(4));
}

#[tokio::test]
async fn test_created_actors_get_unique_ids() {
    let (_system, root) = fresh_system().await;
    let mut ids = HashSet::new();
    for _ in 0..16 {
        let actor = root
            .create_child(
                BehaviorSpec::definition(echo_table()),
                CreateOptions::default(),
            )
            .await
            .unwrap();
        assert!(ids.insert(actor.id().clone()));
    }
}

#[tokio::test]
async fn test_hierarchy_links_are_stable() {
    let (_system, root) = fresh_system().await;
    let parent = root
        .create_child(
            BehaviorSpec::definition(echo_table()),
            CreateOptions::default(),
        )
        .await
        .unwrap();
    let child = parent
        .create_child(
            BehaviorSpec::definition(echo_table()),
            CreateOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(child.parent().unwrap().id(), parent.id());
    assert_eq!(parent.parent().unwrap().id(), root.id());
    assert!(root.parent().is_none());
    assert_eq!(parent.children().len(), 1);
    assert_eq!(parent.children()[0].id(), child.id());
}

#[tokio::test]
async fn test_messages_from_one_sender_keep_their_order() {
    let (_system, root) = fresh_system().await;
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = seen.clone();
    let snapshot_source = seen.clone();
    let recorder = HandlerTable::new("recorder")
        .handler("record", move |payload, _ctx| {
            sink.lock().unwrap().push(payload);
            async move { Ok(None) }
        })
        .handler("snapshot", move |_payload, _ctx| {
            let entries = snapshot_source.lock().unwrap().clone();
            async move { Ok(Some(Value::Array(entries))) }
        });
    let actor = root
        .create_child(
            BehaviorSpec::definition(recorder),
            CreateOptions::default(),
        )
        .await
        .unwrap();

    for n in 0..100 {
        actor.tell("record", json!(n)).await.unwrap();
    }
    let snapshot = actor.ask("snapshot", Value::Null).await.unwrap();
    let expected: Vec<Value> = (0..100).map(|n| json!(n)).collect();
    assert_eq!(snapshot, Value::Array(expected));
}

#[tokio::test]
async fn test_handler_error_reaches_the_asker() {
    let (_system, root) = fresh_system().await;
    let actor = root
        .create_child(
            BehaviorSpec::definition(echo_table()),
            CreateOptions::default(),
        )
        .await
        .unwrap();
    let result = actor.ask("missing", Value::Null).await;
    assert_eq!(
        result.err(),
        Some(Error::Handler("no handler for topic 'missing'".to_owned()))
    );
}

#[tokio::test]
#[traced_test]
async fn test_handler_error_on_tell_is_logged_and_dropped() {
    let (_system, root) = fresh_system().await;
    let actor = root
        .create_child(
            BehaviorSpec::definition(echo_table()),
            CreateOptions::default(),
        )
        .await
        .unwrap();
    actor.tell("missing", Value::Null).await.unwrap();
    // The actor keeps working afterwards.
    let reply = actor.ask("echo", json!(1)).await.unwrap();
    assert_eq!(reply, json!(1));
    assert!(logs_contain("Handler for topic 'missing'"));
}

#[tokio::test]
#[traced_test]
async fn test_destroyed_actor_rejects_traffic() {
    let destroyed = Arc::new(AtomicBool::new(false));
    let flag = destroyed.clone();
    let table = echo_table().on_destroy(move |_ctx| {
        let flag = flag.clone();
        async move {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        }
    });

    let (_system, root) = fresh_system().await;
    let actor = root
        .create_child(
            BehaviorSpec::definition(table),
            CreateOptions::default(),
        )
        .await
        .unwrap();
    let id = actor.id().clone();

    actor.destroy().await.unwrap();
    assert!(destroyed.load(Ordering::SeqCst));
    assert!(root.children().is_empty());

    // A tell is dropped with a warning, an ask fails.
    actor.tell("echo", json!(1)).await.unwrap();
    assert!(logs_contain("is being destroyed"));
    assert_eq!(
        actor.ask("echo", json!(1)).await,
        Err(Error::Destroyed(id))
    );
}

#[tokio::test]
async fn test_ask_times_out() {
    let (_system, root) = fresh_system().await;
    let sleeper = HandlerTable::new("sleeper").handler(
        "nap",
        |_payload, _ctx| async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(None)
        },
    );
    let actor = root
        .create_child(
            BehaviorSpec::definition(sleeper),
            CreateOptions::default(),
        )
        .await
        .unwrap();
    let result = actor
        .ask_with_timeout("nap", Value::Null, Duration::from_millis(50))
        .await;
    assert_eq!(result, Err(Error::Timeout));
}

#[tokio::test]
async fn test_cluster_round_robin() {
    let registry = BehaviorRegistry::new();
    registry.register("whoami", |_params| {
        let table = HandlerTable::new("whoami").handler(
            "whoami",
            |_payload, ctx| {
                let id = ctx.id().to_string();
                async move { Ok(Some(json!(id))) }
            },
        );
        Ok(Box::new(table) as Box<dyn Behavior>)
    });
    let system =
        ActorSystem::new(SystemOptions::default().with_registry(registry));
    let root = system.root_actor().await.unwrap();

    let cluster = root
        .create_child(
            BehaviorSpec::registered("whoami"),
            CreateOptions::default().with_cluster_size(3),
        )
        .await
        .unwrap();
    assert_eq!(cluster.children().len(), 3);

    let mut seen = Vec::new();
    for _ in 0..3 {
        seen.push(cluster.ask("whoami", Value::Null).await.unwrap());
    }
    let distinct: HashSet<String> = seen
        .iter()
        .map(|value| value.as_str().unwrap().to_owned())
        .collect();
    assert_eq!(distinct.len(), 3);

    // The fourth send wraps around to the first child.
    let fourth = cluster.ask("whoami", Value::Null).await.unwrap();
    assert_eq!(fourth, seen[0]);
}

#[tokio::test]
async fn test_balancer_skips_dead_children() {
    let registry = BehaviorRegistry::new();
    registry.register("whoami", |_params| {
        let table = HandlerTable::new("whoami").handler(
            "whoami",
            |_payload, ctx| {
                let id = ctx.id().to_string();
                async move { Ok(Some(json!(id))) }
            },
        );
        Ok(Box::new(table) as Box<dyn Behavior>)
    });
    let system =
        ActorSystem::new(SystemOptions::default().with_registry(registry));
    let root = system.root_actor().await.unwrap();
    let cluster = root
        .create_child(
            BehaviorSpec::registered("whoami"),
            CreateOptions::default().with_cluster_size(3),
        )
        .await
        .unwrap();

    let victim = cluster.children()[0].clone();
    let victim_id = victim.id().to_string();
    victim.destroy().await.unwrap();

    let mut seen = HashSet::new();
    for _ in 0..4 {
        let id = cluster.ask("whoami", Value::Null).await.unwrap();
        seen.insert(id.as_str().unwrap().to_owned());
    }
    assert_eq!(seen.len(), 2);
    assert!(!seen.contains(&victim_id));
}

#[tokio::test]
async fn test_config_file_overrides_placement_params() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{"worker": {{"mode": "in-memory", "bucket": "alpha"}}}}"#
    )
    .unwrap();

    let registry = BehaviorRegistry::new();
    registry.register("worker", |params| {
        let table = HandlerTable::new("worker").handler(
            "params",
            move |_payload, _ctx| {
                let params = params.clone();
                async move { Ok(Some(params)) }
            },
        );
        Ok(Box::new(table) as Box<dyn Behavior>)
    });

    let system = ActorSystem::new(
        SystemOptions::default()
            .with_registry(registry)
            .with_config(ConfigSource::Path(file.path().to_path_buf())),
    );
    let root = system.root_actor().await.unwrap();
    let actor = root
        .create_child(
            BehaviorSpec::registered("worker"),
            CreateOptions::default(),
        )
        .await
        .unwrap();
    let params = actor.ask("params", Value::Null).await.unwrap();
    assert_eq!(params, json!({"bucket": "alpha"}));
}

#[tokio::test]
#[traced_test]
async fn test_missing_config_degrades_to_empty() {
    let system = ActorSystem::new(SystemOptions::default().with_config(
        ConfigSource::Path("/nonexistent/actors.json".into()),
    ));
    // The system still becomes ready.
    let root = system.root_actor().await.unwrap();
    assert!(root.parent().is_none());
    assert!(logs_contain("Failed to load configuration"));
}

#[tokio::test]
async fn test_unknown_mode_is_rejected() {
    let (_system, root) = fresh_system().await;
    let result = root
        .create_child(
            BehaviorSpec::definition(echo_table()),
            CreateOptions {
                mode: Some("sideways".to_owned()),
                ..Default::default()
            },
        )
        .await;
    assert_eq!(result.err(), Some(Error::UnknownMode("sideways".to_owned())));
}

#[tokio::test]
async fn test_system_destroy_tears_the_tree_down() {
    let (system, root) = fresh_system().await;
    let child = root
        .create_child(
            BehaviorSpec::definition(echo_table()),
            CreateOptions::default(),
        )
        .await
        .unwrap();
    let grandchild = child
        .create_child(
            BehaviorSpec::definition(echo_table()),
            CreateOptions::default(),
        )
        .await
        .unwrap();

    system.destroy().await.unwrap();
    assert!(system.cancellation_token().is_cancelled());
    assert!(root.is_destroying());
    assert!(child.is_destroying());
    assert!(grandchild.is_destroying());
    assert!(matches!(
        grandchild.ask("echo", Value::Null).await,
        Err(Error::Destroyed(_))
    ));
}
