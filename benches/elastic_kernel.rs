//! Elastic layer hot paths.
//!
//! 1. Deriving the active kernel through the transform chain
//! 2. Channel filtering of primary weights
//! 3. Forward pass of a small super-network at full and smallest size

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use burn::backend::NdArray;
use burn::prelude::*;

use elastic_nas::config::{StageConfig, SuperNetConfig};
use elastic_nas::elastic::{filter_primary_weights, ChannelFilter, KernelSizes, KernelTransformChain};
use elastic_nas::search::SearchSpace;

type B = NdArray;

fn master(out_channels: usize, in_channels: usize, k: usize) -> Tensor<B, 3> {
    let data: Vec<f32> = (0..out_channels * in_channels * k)
        .map(|i| ((i * 7919) % 101) as f32 / 101.0 - 0.5)
        .collect();
    Tensor::from_data(
        TensorData::new(data, [out_channels, in_channels, k]),
        &Default::default(),
    )
}

fn bench_derive_kernel(c: &mut Criterion) {
    let sizes = KernelSizes::new(vec![9, 7, 5, 3]).unwrap();
    let mut chain = KernelTransformChain::new(master(64, 64, 9), sizes).unwrap();

    let mut group = c.benchmark_group("derive_active_kernel");
    for size in [9, 5, 3] {
        chain.selection_mut().set_active_kernel(size);
        group.bench_function(format!("64x64_k{}", size), |b| {
            b.iter(|| black_box(chain.derive_active_kernel()))
        });
    }
    group.finish();
}

fn bench_channel_filter(c: &mut Criterion) {
    let weights = master(128, 64, 5);
    let in_filter = ChannelFilter::full(64);
    let half = ChannelFilter::leading(128, 64);
    let scores: Vec<f32> = (0..128).map(|i| ((i * 31) % 17) as f32).collect();
    let top = ChannelFilter::top_k(&scores, 96);

    let mut group = c.benchmark_group("filter_primary_weights");
    group.bench_function("leading_half", |b| {
        b.iter(|| filter_primary_weights(black_box(weights.clone()), &in_filter, &half))
    });
    group.bench_function("top_k_96", |b| {
        b.iter(|| filter_primary_weights(black_box(weights.clone()), &in_filter, &top))
    });
    group.finish();
}

fn bench_supernet_forward(c: &mut Criterion) {
    let device = Default::default();
    let config = SuperNetConfig::new(
        1,
        4,
        vec![StageConfig::new(16, 2), StageConfig::new(24, 2).with_stride(2)],
    );
    let space = SearchSpace::from_config(&config);
    let mut net = config.init::<B>(&device).unwrap();
    let input = master(8, 1, 128);

    let mut group = c.benchmark_group("supernet_forward");
    group.bench_function("full", |b| b.iter(|| black_box(net.forward(input.clone()))));
    net.apply_parametrization(&space.smallest()).unwrap();
    group.bench_function("smallest", |b| {
        b.iter(|| black_box(net.forward(input.clone())))
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_derive_kernel,
    bench_channel_filter,
    bench_supernet_forward
);
criterion_main!(benches);
