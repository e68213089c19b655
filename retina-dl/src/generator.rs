//! Batched training target generation.

use crate::{
    anchor::{AnchorCache, AnchorSet},
    assign::{AnchorLabelAssigner, AnchorState, AnchorTargets},
    common::*,
    config::Config,
    dataset::{DataRecord, DetectionDataset},
};

/// The stacked training targets of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetBatch {
    /// The shape all images in the batch are padded to.
    pub image_size: HW<usize>,
    /// `[batch, num_anchors, num_classes]` labels in `{0, 1, -1}`.
    pub classification: Array3<i8>,
    /// `[batch, num_anchors, 4]` encoded box offsets.
    pub regression: Array3<f32>,
    /// `[batch, num_anchors]` anchor states.
    pub states: Array2<AnchorState>,
}

impl TargetBatch {
    pub fn batch_size(&self) -> usize {
        self.states.nrows()
    }

    pub fn num_anchors(&self) -> usize {
        self.states.ncols()
    }
}

/// The element-wise maximum image size of a batch, which every image is padded to.
pub fn padded_size<'a, I>(records: I) -> Result<HW<usize>>
where
    I: IntoIterator<Item = &'a DataRecord>,
{
    records
        .into_iter()
        .map(|record| record.image_size)
        .reduce(|lhs, rhs| lhs.max(&rhs))
        .ok_or_else(|| format_err!("the batch must not be empty"))
}

/// Computes anchor targets for batches of records.
#[derive(Debug)]
pub struct TargetGenerator {
    anchors: AnchorCache,
    assigner: AnchorLabelAssigner,
}

impl TargetGenerator {
    pub fn new(config: &Config) -> Result<Self> {
        let anchors = config.anchor_cache()?;
        let assigner = config.assigner_init().build()?;

        Ok(Self { anchors, assigner })
    }

    pub fn assigner(&self) -> &AnchorLabelAssigner {
        &self.assigner
    }

    /// Get the anchors used for an input shape.
    pub fn anchors(&self, image_size: &HW<usize>) -> Result<Arc<AnchorSet>> {
        self.anchors.get(image_size)
    }

    /// Compute the targets of one record against the anchors of `image_size`.
    pub fn generate_one(
        &self,
        image_size: &HW<usize>,
        record: &DataRecord,
    ) -> Result<AnchorTargets> {
        let anchors = self.anchors.get(image_size)?;
        let (record, num_dropped) = record.sanitized();
        if num_dropped > 0 {
            debug!("dropped {} boxes without positive area", num_dropped);
        }
        self.assigner.assign(&anchors, &record.labels)
    }

    /// Compute the stacked targets of a batch.
    ///
    /// Images are assumed to be padded to the element-wise maximum size of the
    /// batch, so every record is assigned against the anchors of that size.
    pub fn generate(&self, records: &[DataRecord]) -> Result<TargetBatch> {
        let image_size = padded_size(records)?;

        let targets: Vec<_> = records
            .iter()
            .enumerate()
            .map(|(index, record)| {
                self.generate_one(&image_size, record)
                    .with_context(|| format!("fail to assign targets for batch item {}", index))
            })
            .try_collect()?;

        let classification = {
            let views: Vec<_> = targets.iter().map(|t| t.classification.view()).collect();
            stack(Axis(0), &views)?
        };
        let regression = {
            let views: Vec<_> = targets.iter().map(|t| t.regression.view()).collect();
            stack(Axis(0), &views)?
        };
        let states = {
            let num_anchors = targets[0].num_anchors();
            let states: Vec<_> = targets
                .iter()
                .flat_map(|t| t.states.iter().copied())
                .collect();
            Array2::from_shape_vec((targets.len(), num_anchors), states)?
        };

        Ok(TargetBatch {
            image_size,
            classification,
            regression,
            states,
        })
    }

    /// Iterate over the dataset in batches of `batch_size` records.
    ///
    /// The last batch may be smaller.
    pub fn batches<'a, D>(
        &'a self,
        dataset: &'a D,
        batch_size: usize,
    ) -> Result<impl Iterator<Item = Result<TargetBatch>> + 'a>
    where
        D: DetectionDataset + ?Sized,
    {
        ensure!(batch_size > 0, "batch_size must be positive");
        let num_records = dataset.num_records();
        info!(
            "generating targets for {} records with batch size {}",
            num_records, batch_size
        );

        let iter = (0..num_records)
            .step_by(batch_size)
            .map(move |start| -> Result<_> {
                let end = cmp::min(start + batch_size, num_records);
                let records: Vec<DataRecord> = (start..end)
                    .map(|index| -> Result<_> { Ok(dataset.record(index)?.as_ref().clone()) })
                    .try_collect()?;
                self.generate(&records)
            });

        Ok(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::MemoryDataset;

    fn config() -> Config {
        Config::new(NonZeroUsize::new(2).unwrap())
    }

    fn record(size: [usize; 2], labels: Vec<GroundTruth<f32>>) -> DataRecord {
        DataRecord {
            image_size: HW::from_hw(size),
            labels,
        }
    }

    #[test]
    fn batch_is_padded_to_max_size() -> Result<()> {
        let generator = TargetGenerator::new(&config())?;
        let records = vec![
            record([128, 64], vec![GroundTruth::from_xyxy([8.0, 8.0, 40.0, 40.0], 1)]),
            record([64, 128], vec![]),
        ];

        let batch = generator.generate(&records)?;
        let anchors = generator.anchors(&HW::from_hw([128, 128]))?;

        assert_eq!(batch.image_size, HW::from_hw([128, 128]));
        assert_eq!(batch.batch_size(), 2);
        assert_eq!(batch.num_anchors(), anchors.len());
        assert_eq!(batch.classification.shape(), &[2, anchors.len(), 2]);
        assert_eq!(batch.regression.shape(), &[2, anchors.len(), 4]);

        assert!(batch.states.row(0).iter().any(AnchorState::is_positive));
        assert!(batch
            .states
            .row(1)
            .iter()
            .all(|&state| state == AnchorState::Negative));
        assert!(batch
            .regression
            .index_axis(Axis(0), 1)
            .iter()
            .all(|&value| value == 0.0));
        Ok(())
    }

    #[test]
    fn degenerate_boxes_are_dropped() -> Result<()> {
        let generator = TargetGenerator::new(&config())?;
        let records = vec![record(
            [64, 64],
            vec![GroundTruth::from_xyxy([10.0, 10.0, 10.0, 30.0], 0)],
        )];

        let batch = generator.generate(&records)?;
        assert!(batch
            .states
            .iter()
            .all(|&state| state == AnchorState::Negative));
        Ok(())
    }

    #[test]
    fn dataset_batches() -> Result<()> {
        let generator = TargetGenerator::new(&config())?;
        let classes: IndexSet<String> = ["cat", "dog"].iter().map(|s| s.to_string()).collect();
        let records = (0..5)
            .map(|_| record([64, 64], vec![GroundTruth::from_xyxy([0.0, 0.0, 32.0, 32.0], 0)]))
            .collect();
        let dataset = MemoryDataset::new(classes, records)?;

        let sizes: Vec<_> = generator
            .batches(&dataset, 2)?
            .map(|batch| -> Result<_> { Ok(batch?.batch_size()) })
            .try_collect()?;
        assert_eq!(sizes, vec![2, 2, 1]);
        Ok(())
    }

    #[test]
    fn padded_size_is_elementwise_max() -> Result<()> {
        let records = [
            record([120, 64], vec![]),
            record([64, 200], vec![]),
            record([96, 96], vec![]),
        ];
        assert_eq!(padded_size(&records)?, HW::from_hw([120, 200]));
        assert_eq!(padded_size(&records[2..])?, HW::from_hw([96, 96]));
        assert!(padded_size(&[]).is_err());
        Ok(())
    }

    #[test]
    fn empty_batch_is_rejected() -> Result<()> {
        let generator = TargetGenerator::new(&config())?;
        assert!(generator.generate(&[]).is_err());

        let classes: IndexSet<String> = ["cat".to_string()].into_iter().collect();
        let dataset = MemoryDataset::new(classes, vec![])?;
        assert!(generator.batches(&dataset, 0).is_err());
        Ok(())
    }
}
