//! Detection datasets yielding image sizes and ground truth boxes.

use crate::common::*;

/// The dataset trait consumed by the target generator.
pub trait DetectionDataset
where
    Self: Debug + Send + Sync,
{
    /// The list of class names of the dataset.
    fn classes(&self) -> &IndexSet<String>;

    /// Get number of records in the dataset.
    fn num_records(&self) -> usize;

    /// Get the nth record in the dataset.
    fn record(&self, index: usize) -> Result<Arc<DataRecord>>;
}

/// The record with the image size and boxes, but without image pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRecord {
    pub image_size: HW<usize>,
    /// Bounding boxes in pixel units.
    pub labels: Vec<GroundTruth<f32>>,
}

impl DataRecord {
    /// Return a copy without boxes of zero or negative area, along with the
    /// number of dropped boxes.
    pub fn sanitized(&self) -> (Self, usize) {
        let labels: Vec<_> = self
            .labels
            .iter()
            .filter(|label| label.is_valid())
            .cloned()
            .collect();
        let num_dropped = self.labels.len() - labels.len();

        let record = Self {
            image_size: self.image_size,
            labels,
        };
        (record, num_dropped)
    }
}

/// A dataset with all records held in memory.
#[derive(Debug, Clone)]
pub struct MemoryDataset {
    classes: IndexSet<String>,
    records: Vec<Arc<DataRecord>>,
}

impl DetectionDataset for MemoryDataset {
    fn classes(&self) -> &IndexSet<String> {
        &self.classes
    }

    fn num_records(&self) -> usize {
        self.records.len()
    }

    fn record(&self, index: usize) -> Result<Arc<DataRecord>> {
        let record = self.records.get(index).ok_or_else(|| {
            format_err!(
                "record index {} is out of range [0, {})",
                index,
                self.records.len()
            )
        })?;
        Ok(record.clone())
    }
}

impl MemoryDataset {
    pub fn new(classes: IndexSet<String>, records: Vec<DataRecord>) -> Result<Self> {
        ensure!(!classes.is_empty(), "the dataset must have at least one class");

        records
            .iter()
            .enumerate()
            .try_for_each(|(index, record)| -> Result<_> {
                ensure!(
                    record.image_size.h() > 0 && record.image_size.w() > 0,
                    "record {}: image height and width must be positive",
                    index
                );
                record.labels.iter().try_for_each(|label| -> Result<_> {
                    ensure!(
                        label.class < classes.len(),
                        "record {}: class index {} is out of range [0, {})",
                        index,
                        label.class,
                        classes.len()
                    );
                    Ok(())
                })
            })?;

        Ok(Self {
            classes,
            records: records.into_iter().map(Arc::new).collect(),
        })
    }

    /// Load a dataset from a JSON5 file.
    ///
    /// The file lists class names and records, each object referring to its
    /// class by name.
    ///
    /// ```json5
    /// {
    ///     classes: ["person", "car"],
    ///     records: [
    ///         {
    ///             height: 480,
    ///             width: 640,
    ///             objects: [{ class: "car", xyxy: [12.0, 40.5, 200.0, 310.0] }],
    ///         },
    ///     ],
    /// }
    /// ```
    pub fn open<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("fail to read file '{}'", path.display()))?;
        let file: DatasetFile = json5::from_str(&text)
            .with_context(|| format!("fail to parse file '{}'", path.display()))?;
        Self::from_file(file).with_context(|| format!("invalid dataset file '{}'", path.display()))
    }

    fn from_file(file: DatasetFile) -> Result<Self> {
        let DatasetFile {
            classes: class_list,
            records,
        } = file;

        let classes: IndexSet<String> = class_list.iter().cloned().collect();
        ensure!(
            classes.len() == class_list.len(),
            "duplicated class names are not allowed"
        );

        let records: Vec<_> = records
            .into_iter()
            .map(|entry| -> Result<_> {
                let RecordEntry {
                    height,
                    width,
                    objects,
                } = entry;

                let labels: Vec<_> = objects
                    .into_iter()
                    .map(|object| -> Result<_> {
                        let class = classes
                            .get_index_of(&object.class)
                            .ok_or_else(|| format_err!("unknown class '{}'", object.class))?;
                        Ok(GroundTruth::from_xyxy(object.xyxy, class))
                    })
                    .try_collect()?;

                Ok(DataRecord {
                    image_size: HW::from_hw([height, width]),
                    labels,
                })
            })
            .try_collect()?;

        Self::new(classes, records)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct DatasetFile {
    classes: Vec<String>,
    records: Vec<RecordEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct RecordEntry {
    height: usize,
    width: usize,
    #[serde(default)]
    objects: Vec<ObjectEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct ObjectEntry {
    class: String,
    xyxy: [f32; 4],
}
