use crate::{
    common::*,
    config::Config,
    io::{detection_entries, write_json, AnchorEntry, PredictionFile, TargetSummary},
};
use prettytable::{cell, row, Table};
use retina_dl::{
    dataset::{DetectionDataset, MemoryDataset},
    generator::{padded_size, TargetGenerator},
    inference::RetinaInference,
    registry::{LayerRegistry, DEFAULT_LAYERS},
};

/// Print the pyramid levels and anchor counts for an input shape.
pub fn info(config: &Config, image_size: &HW<usize>) -> Result<()> {
    let generator = config.detector.anchor_generator_init().build()?;
    let anchors = generator.generate_for_image(image_size)?;

    let mut table = Table::new();
    table.add_row(row!["level", "stride", "size", "feature shape", "anchors", "range"]);

    izip!(generator.levels(), anchors.feature_shapes())
        .enumerate()
        .try_for_each(|(index, (level, shape))| -> Result<_> {
            let range = anchors.level_range(index)?;
            table.add_row(row![
                index,
                level.stride,
                level.size,
                format!("{:?}", shape.hw()),
                range.len(),
                format!("{:?}", range),
            ]);
            Ok(())
        })?;

    table.printstd();
    println!(
        "{} anchors per cell, {} anchors in total",
        generator.num_anchors_per_cell(),
        anchors.len()
    );

    Ok(())
}

/// Dump the anchors of an input shape in network output order.
pub fn anchors(config: &Config, image_size: &HW<usize>, output_file: Option<&Path>) -> Result<()> {
    let generator = config.detector.anchor_generator_init().build()?;
    let anchors = generator.generate_for_image(image_size)?;
    info!(
        "generated {} anchors for image size {:?}",
        anchors.len(),
        image_size.hw()
    );

    let entries: Vec<AnchorEntry> = anchors.anchors().iter().map(AnchorEntry::from).collect();
    write_json(output_file, &entries)
}

/// Assign anchor targets for a dataset and report per-record statistics.
pub fn targets(config: &Config, dataset_file: &Path, output_file: Option<&Path>) -> Result<()> {
    let dataset = MemoryDataset::open(dataset_file)?;
    let generator = TargetGenerator::new(&config.detector)?;
    ensure!(
        dataset.classes().len() <= config.detector.num_classes.get(),
        "the dataset has {} classes, but the detector is configured with {}",
        dataset.classes().len(),
        config.detector.num_classes
    );

    let records: Vec<_> = (0..dataset.num_records())
        .map(|index| dataset.record(index))
        .try_collect()?;

    let summaries: Vec<TargetSummary> = records
        .iter()
        .enumerate()
        .map(|(index, record)| -> Result<_> {
            let targets = generator
                .generate_one(&record.image_size, record)
                .with_context(|| format!("fail to assign targets for record {}", index))?;
            if targets.num_positive() == 0 && !record.labels.is_empty() {
                warn!("record {} has boxes but no positive anchor", index);
            }
            Ok(TargetSummary::new(index, &record.image_size, &targets))
        })
        .try_collect()?;

    // batch shapes as seen by a training loop
    ensure!(config.batch_size > 0, "batch_size must be positive");
    let num_batches = records.chunks(config.batch_size).len();
    records.chunks(config.batch_size).try_for_each(|batch| -> Result<_> {
        let image_size = padded_size(batch.iter().map(|record| &**record))?;
        let anchors = generator.anchors(&image_size)?;
        info!(
            "batch of {} records padded to {:?}, {} anchors",
            batch.len(),
            image_size.hw(),
            anchors.len()
        );
        Ok(())
    })?;
    info!("{} records form {} batches", records.len(), num_batches);

    write_json(output_file, &summaries)
}

/// Turn raw head outputs into detections.
pub fn detect(config: &Config, input_file: &Path, output_file: Option<&Path>) -> Result<()> {
    let text = fs::read_to_string(input_file)
        .with_context(|| format!("fail to read file '{}'", input_file.display()))?;
    let prediction: PredictionFile = serde_json::from_str(&text)
        .with_context(|| format!("fail to parse file '{}'", input_file.display()))?;
    let (classification, regression) = prediction.to_arrays()?;
    ensure!(
        classification.ncols() == config.detector.num_classes.get(),
        "expect {} class scores per anchor, but get {}",
        config.detector.num_classes,
        classification.ncols()
    );

    let registry = LayerRegistry::default();
    let inference = RetinaInference::from_registry(&registry, &DEFAULT_LAYERS, &config.detector)?;
    let detections = inference.forward(
        &prediction.image_size(),
        classification.view(),
        regression.view(),
    )?;
    info!("found {} detections", detections.num_valid());

    write_json(output_file, &detection_entries(&detections))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targets_summarize_every_record() -> Result<()> {
        let config: Config = json5::from_str(
            "{ version: '0.1.0', detector: { num_classes: 3 }, batch_size: 2 }",
        )?;
        let dataset_file = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../retina-dl/tests/cfg/dataset.json5");
        let output_file = std::env::temp_dir().join("retina-tool-targets-test.json");

        targets(&config, &dataset_file, Some(&output_file))?;

        let text = fs::read_to_string(&output_file)?;
        fs::remove_file(&output_file)?;
        let summaries: serde_json::Value = serde_json::from_str(&text)?;
        let summaries = summaries.as_array().unwrap();
        assert_eq!(summaries.len(), 3);
        assert!(summaries[0]["num_positive"].as_u64().unwrap() > 0);
        assert_eq!(summaries[1]["height"], 200);
        assert_eq!(summaries[2]["num_positive"], 0);
        Ok(())
    }

    #[test]
    fn oversized_dataset_is_rejected() -> Result<()> {
        let config: Config =
            json5::from_str("{ version: '0.1.0', detector: { num_classes: 2 } }")?;
        let dataset_file = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../retina-dl/tests/cfg/dataset.json5");
        assert!(targets(&config, &dataset_file, None).is_err());
        Ok(())
    }
}
