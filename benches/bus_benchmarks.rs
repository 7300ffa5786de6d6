use std::{hint::black_box, time::Duration};

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use shortbus::{Bus, Handler, Message, SubscribeOptions};
use tokio::runtime::{Builder, Runtime};

fn runtime() -> Runtime {
    Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap()
}

fn bench_publish_no_subscribers(c: &mut Criterion) {
    let rt = runtime();
    let bus = rt.block_on(async { Bus::with_defaults().unwrap() });
    c.bench_function("bus_publish_0_subs", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(bus.publish("Orders::Created").await.unwrap()) })
    });
    rt.block_on(bus.shutdown(Some(Duration::from_secs(1))));
}

fn bench_publish_fan_out(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("bus_publish_fan_out");
    for subs in [1usize, 10, 50] {
        let bus = rt.block_on(async {
            let bus = Bus::with_defaults().unwrap();
            for _ in 0..subs {
                let noop = Handler::consumer(|_msg: Message| async {});
                bus.subscribe(SubscribeOptions::new(noop).topic_filter("Orders::*"))
                    .unwrap();
            }
            bus
        });
        group.bench_with_input(BenchmarkId::from_parameter(subs), &bus, |b, bus| {
            b.to_async(&rt)
                .iter(|| async { black_box(bus.publish("Orders::Created").await.unwrap()) })
        });
        rt.block_on(bus.shutdown(Some(Duration::from_secs(1))));
    }
    group.finish();
}

fn bench_request_reply(c: &mut Criterion) {
    let rt = runtime();
    let bus = rt.block_on(async {
        let bus = Bus::with_defaults().unwrap();
        let echo = Handler::consumer(|msg: Message| async move {
            msg.reply(true);
        });
        bus.subscribe(SubscribeOptions::new(echo).topic_filter("Ping").concurrency(4))
            .unwrap();
        bus
    });
    c.bench_function("bus_request_reply", |b| {
        b.to_async(&rt).iter(|| async {
            let msg = bus.publish("Ping").await.unwrap();
            black_box(msg.recv_reply().await)
        })
    });
    rt.block_on(bus.shutdown(Some(Duration::from_secs(1))));
}

criterion_group!(
    benches,
    bench_publish_no_subscribers,
    bench_publish_fan_out,
    bench_request_reply
);
criterion_main!(benches);
