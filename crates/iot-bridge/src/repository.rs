use async_trait::async_trait;
use iot_common::Measurement;
use anyhow::Result;
use parking_lot::Mutex;

/// Storage for bin readings
#[async_trait]
pub trait MeasurementRepository: Send + Sync {
    async fn record_measurement(&self, measurement: &Measurement) -> Result<()>;
    async fn record_many(&self, measurements: &[Measurement]) -> Result<usize>;
}

/// Process-local repository used for development and tests
#[derive(Default)]
pub struct InMemoryMeasurementRepository {
    measurements: Mutex<Vec<Measurement>>,
}

impl InMemoryMeasurementRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<Measurement> {
        self.measurements.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.measurements.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.measurements.lock().is_empty()
    }
}

#[async_trait]
impl MeasurementRepository for InMemoryMeasurementRepository {
    async fn record_measurement(&self, measurement: &Measurement) -> Result<()> {
        self.measurements.lock().push(measurement.clone());
        Ok(())
    }

    async fn record_many(&self, measurements: &[Measurement]) -> Result<usize> {
        self.measurements.lock().extend_from_slice(measurements);
        Ok(measurements.len())
    }
}
