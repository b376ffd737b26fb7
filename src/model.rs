use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::appearance::{PartsInterface, PcaAppearanceModel};
use crate::error::{ensure_len, Error, Result};
use crate::shape_model::{OrthoPdm, PointDistributionModel};

/// A trained unified (AAM + CLM) model.
///
/// The model consists of:
/// - A PCA appearance model over a parts-based reference frame
/// - A point distribution model with a global similarity pose
/// - The parts interface describing the reference frame
///
/// Part classifiers are kept outside the model and handed to the fitting
/// algorithm, so any [`PartClassifier`](crate::PartClassifier) can be used.
///
/// # Usage
///
/// ```ignore
/// let model = UnifiedModel::load("model.bin")?;
/// let fitter = Fitter::new(AlgorithmKind::PicRlms, &model, &filters, FitterConfig::default())?;
/// let result = fitter.run(&image, &initial_shape, None, &RunOptions::default())?;
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedModel {
    appearance: PcaAppearanceModel,
    shape: OrthoPdm,
    interface: PartsInterface,
}

impl UnifiedModel {
    pub fn new(
        appearance: PcaAppearanceModel,
        shape_model: PointDistributionModel,
        interface: PartsInterface,
    ) -> Result<Self> {
        ensure_len("appearance pixels", interface.n_pixels(), appearance.n_pixels())?;
        ensure_len("model landmarks", interface.n_landmarks(), shape_model.n_points())?;
        let shape = OrthoPdm::new(shape_model)?;
        Ok(Self {
            appearance,
            shape,
            interface,
        })
    }

    /// Load a model from a binary file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        let model: Self = bincode::deserialize(&bytes)?;
        Ok(model)
    }

    /// Save the model to a binary file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        let bytes = bincode::serialize(self)?;
        writer.write_all(&bytes)?;
        Ok(())
    }

    pub fn appearance(&self) -> &PcaAppearanceModel {
        &self.appearance
    }

    pub fn shape(&self) -> &OrthoPdm {
        &self.shape
    }

    pub fn interface(&self) -> &PartsInterface {
        &self.interface
    }

    pub fn num_landmarks(&self) -> usize {
        self.interface.n_landmarks()
    }

    pub fn parts_shape(&self) -> (usize, usize) {
        self.interface.parts_shape()
    }
}

/// Builder for creating a UnifiedModel.
pub struct UnifiedModelBuilder {
    appearance: Option<PcaAppearanceModel>,
    shape_model: Option<PointDistributionModel>,
    parts_shape: (usize, usize),
    n_channels: usize,
    normalize_parts: bool,
    sampling_mask: Option<Vec<bool>>,
}

impl UnifiedModelBuilder {
    pub fn new() -> Self {
        Self {
            appearance: None,
            shape_model: None,
            parts_shape: (17, 17),
            n_channels: 1,
            normalize_parts: false,
            sampling_mask: None,
        }
    }

    pub fn appearance_model(mut self, model: PcaAppearanceModel) -> Self {
        self.appearance = Some(model);
        self
    }

    pub fn shape_model(mut self, model: PointDistributionModel) -> Self {
        self.shape_model = Some(model);
        self
    }

    /// Patch `(height, width)`; defaults to 17x17.
    pub fn parts_shape(mut self, parts_shape: (usize, usize)) -> Self {
        self.parts_shape = parts_shape;
        self
    }

    pub fn n_channels(mut self, n_channels: usize) -> Self {
        self.n_channels = n_channels;
        self
    }

    pub fn normalize_parts(mut self, normalize: bool) -> Self {
        self.normalize_parts = normalize;
        self
    }

    pub fn sampling_mask(mut self, mask: Vec<bool>) -> Self {
        self.sampling_mask = Some(mask);
        self
    }

    /// Build the UnifiedModel.
    pub fn build(self) -> Result<UnifiedModel> {
        let appearance = self
            .appearance
            .ok_or_else(|| Error::InvalidModel("Missing appearance model".into()))?;
        let shape_model = self
            .shape_model
            .ok_or_else(|| Error::InvalidModel("Missing shape model".into()))?;

        let interface = PartsInterface::new(
            shape_model.n_points(),
            self.n_channels,
            self.parts_shape,
            self.normalize_parts,
            self.sampling_mask.as_deref(),
        )?;

        UnifiedModel::new(appearance, shape_model, interface)
    }
}

impl Default for UnifiedModelBuilder {
    fn default() -> Self {
        Self::new()
    }
}
