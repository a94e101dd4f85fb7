use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use engine_core::{AnonymousCallableEvent, Engine, Event, EventContext, EventDeclaration};
use engine_types::{DataCoordinates, EngineError, InMemoryStorage, Notification, NotificationFilter, NotificationTag};

type DemoEngine = Engine<Vec<u8>, serde_json::Value>;

/// *S1 Simple submit*: submit a closure returning `42`; the future resolves
/// to it and exactly one `EventExecuted` notification is published.
pub fn s1_simple_submit(engine: &Arc<DemoEngine>) -> anyhow::Result<()> {
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    let subscription = engine.subscribe(NotificationFilter::Tag(NotificationTag::EventExecuted), move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let event: Box<dyn Event<Vec<u8>, serde_json::Value>> =
        Box::new(AnonymousCallableEvent::new(|_ctx| Ok(serde_json::json!(42))));
    let future = engine.submit(event, None, false)?;
    let result = future.await_execution(Some(Duration::from_secs(5)))?;
    assert_eq!(result, serde_json::json!(42));

    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(seen.load(Ordering::SeqCst), 1);
    engine.unsubscribe(subscription);
    tracing::info!("S1 simple submit: future resolved to 42, exactly one EventExecuted seen");
    Ok(())
}

/// *S2 Priority*: a blocking event occupies the worker while a low-priority
/// and a high-priority event queue up behind it; release the block and
/// confirm the high-priority event executes first.
pub fn s2_priority(engine: &Arc<DemoEngine>) -> anyhow::Result<()> {
    let release = Arc::new((Mutex::new(false), std::sync::Condvar::new()));
    let order = Arc::new(Mutex::new(Vec::<&'static str>::new()));

    let blocker = {
        let release = Arc::clone(&release);
        let event: Box<dyn Event<Vec<u8>, serde_json::Value>> =
            Box::new(AnonymousCallableEvent::new(move |_ctx| {
                let (lock, cvar) = &*release;
                let mut released = lock.lock().expect("release mutex poisoned");
                while !*released {
                    released = cvar.wait(released).expect("release mutex poisoned");
                }
                Ok(serde_json::json!("blocker"))
            }));
        engine.submit(event, None, false)?
    };

    let low = {
        let order = Arc::clone(&order);
        let event: Box<dyn Event<Vec<u8>, serde_json::Value>> =
            Box::new(AnonymousCallableEvent::new(move |_ctx| {
                order.lock().expect("order mutex poisoned").push("low");
                Ok(serde_json::json!("low"))
            }).with_declaration(EventDeclaration { priority: 2, ..EventDeclaration::default() }));
        engine.submit(event, None, false)?
    };
    let high = {
        let order = Arc::clone(&order);
        let event: Box<dyn Event<Vec<u8>, serde_json::Value>> =
            Box::new(AnonymousCallableEvent::new(move |_ctx| {
                order.lock().expect("order mutex poisoned").push("high");
                Ok(serde_json::json!("high"))
            }).with_declaration(EventDeclaration { priority: 0, ..EventDeclaration::default() }));
        engine.submit(event, None, false)?
    };

    {
        let (lock, cvar) = &*release;
        *lock.lock().expect("release mutex poisoned") = true;
        cvar.notify_all();
    }
    blocker.await_execution(Some(Duration::from_secs(5)))?;
    high.await_execution(Some(Duration::from_secs(5)))?;
    low.await_execution(Some(Duration::from_secs(5)))?;

    let order = order.lock().expect("order mutex poisoned").clone();
    assert_eq!(order, vec!["high", "low"]);
    tracing::info!(?order, "S2 priority: high-priority event ran before the low-priority one");
    Ok(())
}

/// *S3 Free thread*: a blocking event occupies the default worker while a
/// `use_free_thread` submission is serviced by a freshly spun-up worker.
pub fn s3_free_thread(engine: &Arc<DemoEngine>) -> anyhow::Result<()> {
    let release = Arc::new((Mutex::new(false), std::sync::Condvar::new()));

    let blocker = {
        let release = Arc::clone(&release);
        let event: Box<dyn Event<Vec<u8>, serde_json::Value>> =
            Box::new(AnonymousCallableEvent::new(move |_ctx| {
                let (lock, cvar) = &*release;
                let mut released = lock.lock().expect("release mutex poisoned");
                while !*released {
                    released = cvar.wait(released).expect("release mutex poisoned");
                }
                Ok(serde_json::Value::Null)
            }));
        engine.submit(event, None, false)?
    };

    let event: Box<dyn Event<Vec<u8>, serde_json::Value>> =
        Box::new(AnonymousCallableEvent::new(|_ctx| Ok(serde_json::json!("x"))));
    let free = engine.submit(event, None, true)?;
    let result = free.await_execution(Some(Duration::from_secs(5)))?;
    assert_eq!(result, serde_json::json!("x"));
    assert!(!blocker.is_complete(), "blocker must still be running on the default worker");
    assert!(engine.has_worker("anon-0"), "a new worker anon-0 should have been spun up");

    {
        let (lock, cvar) = &*release;
        *lock.lock().expect("release mutex poisoned") = true;
        cvar.notify_all();
    }
    blocker.await_execution(Some(Duration::from_secs(5)))?;
    tracing::info!("S3 free thread: free-worker submission completed while the default worker was still blocked");
    Ok(())
}

/// *S4 Retry*: an event that raises on its first two attempts and succeeds
/// on the third, given a retry budget of two.
pub fn s4_retry(engine: &Arc<DemoEngine>) -> anyhow::Result<()> {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    let event: Box<dyn Event<Vec<u8>, serde_json::Value>> = Box::new(
        AnonymousCallableEvent::new(move |_ctx| {
            let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt < 3 {
                Err(EngineError::Device(format!("attempt {attempt} failed")))
            } else {
                Ok(serde_json::json!("recovered"))
            }
        })
        .with_declaration(EventDeclaration { retries_on_exception: 2, ..EventDeclaration::default() }),
    );
    let future = engine.submit(event, None, false)?;
    let result = future.await_execution(Some(Duration::from_secs(5)))?;
    assert_eq!(result, serde_json::json!("recovered"));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);

    std::thread::sleep(Duration::from_millis(20));
    engine.check_exceptions()?;
    tracing::info!("S4 retry: succeeded on the third attempt, exception log stayed empty");
    Ok(())
}

/// *S5 Subscribe-by-type*: a sink subscribed to `DataAcquired` only sees the
/// notifications an event publishes for that tag.
pub fn s5_subscribe_by_type(engine: &Arc<DemoEngine>) -> anyhow::Result<()> {
    let seen: Arc<Mutex<Vec<DataCoordinates>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let subscription = engine.subscribe(NotificationFilter::Tag(NotificationTag::DataAcquired), move |n| {
        if let engine_types::NotificationKind::DataAcquired { coords } = &n.kind {
            sink.lock().expect("sink mutex poisoned").push(coords.clone());
        }
    });

    let event: Box<dyn Event<Vec<u8>, serde_json::Value>> = Box::new(
        AnonymousCallableEvent::new(|ctx: &EventContext<Vec<u8>, serde_json::Value>| {
            for t in [0i64, 1i64] {
                let coords = DataCoordinates::new([("t", t)]);
                ctx.publish_notification(Notification::data_acquired(coords));
            }
            Ok(serde_json::Value::Null)
        })
        .with_declaration(EventDeclaration {
            notification_types: [NotificationTag::DataAcquired].into_iter().collect(),
            ..EventDeclaration::default()
        }),
    );
    let future = engine.submit(event, None, false)?;
    future.await_execution(Some(Duration::from_secs(5)))?;

    std::thread::sleep(Duration::from_millis(20));
    let seen = seen.lock().expect("sink mutex poisoned").clone();
    assert_eq!(seen.len(), 2);
    engine.unsubscribe(subscription);
    tracing::info!("S5 subscribe-by-type: sink saw exactly the two DataAcquired notifications");
    Ok(())
}

/// *S6 Data pipeline with processor*: a processor that doubles every byte of
/// the frame; after `await_data` at `processed` and `stored` the caller sees
/// the doubled frame, and the storage back-end received exactly one entry.
pub fn s6_data_pipeline(engine: &Arc<DemoEngine>) -> anyhow::Result<()> {
    let storage: Arc<InMemoryStorage<Vec<u8>, serde_json::Value>> = Arc::new(InMemoryStorage::new());
    engine.install_data_handler(
        Some(Box::new(|coords, data: Vec<u8>, metadata| {
            let doubled: Vec<u8> = data.into_iter().map(|b| b.saturating_mul(2)).collect();
            vec![(coords, doubled, metadata)]
        })),
        Some(Arc::clone(&storage) as Arc<dyn engine_types::DataStorage<Vec<u8>, serde_json::Value>>),
    );

    let coords = DataCoordinates::new([("t", 0i64)]);
    let event_coords = coords.clone();
    let event: Box<dyn Event<Vec<u8>, serde_json::Value>> =
        Box::new(AnonymousCallableEvent::new(move |ctx: &EventContext<Vec<u8>, serde_json::Value>| {
            ctx.put_data(event_coords.clone(), vec![1, 2, 3], serde_json::json!({"frame": 0}))?;
            Ok(serde_json::Value::Null)
        }));
    let future = engine.submit(event, None, false)?;

    let (data, metadata) =
        future.await_data(coords.clone(), true, true, true, false, Some(Duration::from_secs(5)))?;
    assert_eq!(data, Some(vec![2, 4, 6]));
    assert_eq!(metadata, Some(serde_json::json!({"frame": 0})));

    let (data, _) = future.await_data(coords.clone(), true, false, false, true, Some(Duration::from_secs(5)))?;
    assert_eq!(data, Some(vec![2, 4, 6]));

    future.await_execution(Some(Duration::from_secs(5)))?;
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(storage.len(), 1);
    tracing::info!("S6 data pipeline: processor doubled the frame, storage received exactly one entry");
    Ok(())
}
