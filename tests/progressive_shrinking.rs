use std::sync::Arc;

use burn::backend::ndarray::NdArrayDevice;
use burn::backend::{Autodiff, NdArray};

use elastic_nas::checkpoint::{checkpoint_path, load_checkpoint, CheckpointTag};
use elastic_nas::config::{ShrinkConfig, StageConfig, SuperNetConfig};
use elastic_nas::search::SearchSpace;
use elastic_nas::shrink::{ProgressiveShrinking, ShrinkSchedule};
use elastic_nas::train::{DatasetConfig, SupervisedFactory, SyntheticDataset, TrainingConfig};

type B = Autodiff<NdArray>;

fn tiny_supernet() -> SuperNetConfig {
    SuperNetConfig::new(1, 2, vec![StageConfig::new(4, 2)])
        .with_stem_channels(4)
        .with_kernel_sizes(vec![5, 3])
        .with_width_multipliers(vec![1.0, 0.5])
}

fn one_epoch_everywhere(dir: &std::path::Path) -> ShrinkConfig {
    ShrinkConfig::new()
        .with_epochs_warmup(1)
        .with_epochs_kernel_step(1)
        .with_epochs_depth_step(1)
        .with_epochs_warmup_after_width(1)
        .with_epochs_kernel_after_width(1)
        .with_epochs_depth_after_width(1)
        .with_checkpoint_dir(Some(dir.display().to_string()))
}

#[test_log::test]
fn shrinking_reports_and_checkpoints_every_width_step() {
    let dir = tempfile::tempdir().unwrap();
    let device = NdArrayDevice::Cpu;
    let supernet = tiny_supernet();
    let data = DatasetConfig::new()
        .with_num_classes(2)
        .with_sequence_length(16)
        .with_train_samples(8)
        .with_valid_samples(4);
    let (train, valid) = SyntheticDataset::generate(&data).unwrap();
    let factory = SupervisedFactory::<B>::new(
        TrainingConfig::new().with_batch_size(4),
        Arc::new(train),
        Arc::new(valid.clone()),
        device,
    );

    let shrink = one_epoch_everywhere(dir.path());
    let model = supernet.init::<B>(&device).unwrap();
    let schedule = ShrinkSchedule::for_network(&shrink, &model);
    assert!(schedule.total_epochs() > 0);

    let (_, reports) = ProgressiveShrinking::new(&shrink, &factory)
        .run(model)
        .unwrap();

    assert_eq!(reports.len(), 2);
    for (w, report) in reports.iter().enumerate() {
        assert_eq!(report.width_step, w);
        let error = report.metrics["val_error"];
        assert!((0.0..=1.0).contains(&error), "val_error {}", error);
        assert_eq!(
            report.checkpoint.as_deref(),
            Some(checkpoint_path(dir.path(), CheckpointTag::WidthStep(w)).as_path())
        );
    }
    assert!(checkpoint_path(dir.path(), CheckpointTag::Warmup).exists());

    // the last width checkpoint serves every sub-network
    let fresh = supernet.init::<B>(&device).unwrap();
    let mut restored = load_checkpoint(fresh, dir.path(), CheckpointTag::WidthStep(1), &device)
        .unwrap()
        .expect("checkpoint written");
    let smallest = SearchSpace::from_config(&supernet).smallest();
    restored.apply_parametrization(&smallest).unwrap();
    let batch = &valid.batches::<B>(4, &device)[0];
    assert_eq!(restored.forward(batch.inputs.clone()).dims(), [4, 2]);
}
