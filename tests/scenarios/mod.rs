use std::rc::Rc;

use rpcsim::{
    Engine, LeastLoadedBrancher, Port, RandomBrancher, RequestCompleter, RequestGenerator,
    RequestSink, SynchronousForwarder,
};

use crate::types::{exponential, secs, Tap};

/// Given one generator at 2 requests per time unit, starting after 50
/// When it feeds a sink directly until 2000
/// Then the sink should see about 2 * (2000 - 50) requests
#[test]
fn generator_straight_into_sink() {
    for seed in 1..=5 {
        let engine = Engine::new();
        let handle = engine.handle();

        let sink = RequestSink::builder().record_arrivals(true).build(&handle);
        let generator =
            RequestGenerator::builder("external", exponential(0.5, seed), exponential(1.0, seed + 100))
                .with_start_delay(secs(50))
                .build(&handle, sink.clone())
                .unwrap();

        engine.run(secs(2000)).unwrap();

        let received = sink.received() as f64;
        assert!(
            (3315.0..=4485.0).contains(&received),
            "seed {seed}: received {received}"
        );
        assert_eq!(sink.received(), generator.sent());
        // Nothing is in between, so nobody waits.
        assert!(sink.waits().iter().all(|wait| wait.is_zero()));
        assert!(sink.last_arrival() > secs(50));
    }
}

struct RandomPool {
    engine: Engine,
    one: RequestGenerator,
    two: RequestGenerator,
    sink: Rc<RequestSink>,
    completers: Vec<Rc<RequestCompleter>>,
}

fn random_pool(two_mean_interarrival: f64) -> RandomPool {
    let engine = Engine::new();
    let handle = engine.handle();

    let sink = RequestSink::builder()
        .selector(|request| request.source() == "one")
        .build(&handle);

    let completers: Vec<_> = (0..15)
        .map(|_| RequestCompleter::new(&handle, sink.clone()))
        .collect();
    let outputs = || {
        completers
            .iter()
            .map(|c| c.clone() as Rc<dyn Port>)
            .collect::<Vec<_>>()
    };

    let one = RequestGenerator::builder("one", exponential(0.5, 1), exponential(1.0, 2))
        .with_start_delay(secs(50))
        .with_horizon(secs(3000))
        .build(&handle, RandomBrancher::with_seed(outputs(), 3).unwrap())
        .unwrap();
    let two = RequestGenerator::builder(
        "two",
        exponential(two_mean_interarrival, 4),
        exponential(1.0, 5),
    )
    .with_start_delay(secs(50))
    .with_horizon(secs(3000))
    .build(&handle, RandomBrancher::with_seed(outputs(), 6).unwrap())
    .unwrap();

    RandomPool {
        engine,
        one,
        two,
        sink,
        completers,
    }
}

/// Given two generators sharing a pool of completers through random branchers
/// When the sink only selects requests from "one"
/// Then it should count exactly the requests "one" sent, however busy "two" is
#[test]
fn selective_sink_over_shared_pool() {
    let mut received = Vec::new();

    for two_mean_interarrival in [0.5, 0.125] {
        let pool = random_pool(two_mean_interarrival);

        pool.engine.run(secs(3000)).unwrap();
        pool.engine.run_until_idle().unwrap();

        assert_eq!(pool.sink.received(), pool.one.sent());
        assert!(pool.two.sent() > 0);

        let completed: u64 = pool.completers.iter().map(|c| c.stats().completed).sum();
        assert_eq!(completed, pool.one.sent() + pool.two.sent());

        received.push(pool.sink.received());
    }

    assert_eq!(received[0], received[1]);
}

/// Given a least-loaded brancher over 15 completers, the first 2.5 times slower than the rest
/// When one generator runs for a long time
/// Then the slow completer should be sent fewer requests than the others on average
#[test]
fn least_loaded_avoids_the_slow_completer() {
    let engine = Engine::new();
    let handle = engine.handle();

    let sink = RequestSink::new(&handle);
    let completers: Vec<_> = (0..15)
        .map(|_| RequestCompleter::new(&handle, sink.clone()))
        .collect();
    completers[0].set_extra_delay_factor(2.5).unwrap();

    let brancher = LeastLoadedBrancher::new(
        completers
            .iter()
            .map(|c| c.clone() as Rc<dyn Port>)
            .collect(),
    )
    .unwrap();

    let generator = RequestGenerator::builder("external", exponential(0.5, 11), exponential(5.0, 12))
        .with_start_delay(secs(50))
        .with_horizon(secs(5000))
        .build(&handle, brancher.clone())
        .unwrap();

    engine.run(secs(5000)).unwrap();

    let stats = brancher.stats();
    let slow = stats[0] as f64;
    let others = stats[1..].iter().sum::<u64>() as f64 / 14.0;
    assert!(slow < others, "{brancher}");

    assert_eq!(stats.iter().sum::<u64>(), generator.sent());
    for (completer, dispatched) in completers.iter().zip(&stats) {
        assert_eq!(completer.received(), *dispatched);
    }
}

/// Given a forwarder with a single slot in front of a single completer
/// When requests arrive faster than they complete
/// Then only one is ever past the gate, and each is let through only after the previous completed
#[test]
fn single_slot_forwarder_serialises() {
    let engine = Engine::new();
    let handle = engine.handle();

    let sink = RequestSink::new(&handle);
    let completer = RequestCompleter::new(&handle, sink.clone());
    let tap = Tap::new(completer.clone());
    let forwarder = SynchronousForwarder::new(&handle, 1, tap.clone()).unwrap();

    let generator = RequestGenerator::builder("external", exponential(0.5, 21), exponential(0.75, 22))
        .with_horizon(secs(500))
        .build(&handle, forwarder.clone())
        .unwrap();

    engine.run(secs(500)).unwrap();
    engine.run_until_idle().unwrap();

    assert_eq!(forwarder.max_in_flight(), 1);
    assert_eq!(tap.max_outstanding(), 1);
    assert_eq!(tap.seen() as u64, generator.sent());
    assert_eq!(completer.hiwat(), 0);
    assert_eq!(sink.received(), generator.sent());
}

/// Given a forwarder with three slots in front of a slow completer
/// Then no more than three requests are ever past the gate
#[test]
fn forwarder_bounds_concurrency() {
    let engine = Engine::new();
    let handle = engine.handle();

    let completer = RequestCompleter::with_extra_delay_factor(
        &handle,
        RequestSink::new(&handle),
        3.0,
    )
    .unwrap();
    let tap = Tap::new(completer.clone());
    let forwarder = SynchronousForwarder::new(&handle, 3, tap.clone()).unwrap();

    RequestGenerator::builder("external", exponential(0.5, 31), exponential(1.0, 32))
        .with_horizon(secs(200))
        .build(&handle, forwarder.clone())
        .unwrap();

    engine.run(secs(400)).unwrap();

    assert_eq!(forwarder.max_in_flight(), 3);
    assert_eq!(tap.max_outstanding(), 3);
    assert!(completer.hiwat() <= 2);
    // The completer cannot keep up, so requests back up at the gate rather than in its queue.
    assert!(forwarder.waiting() > 0);
}
