use async_trait::async_trait;
use iot_common::Measurement;
use crate::repository::MeasurementRepository;
use anyhow::Result;
use mongodb::{Client, Collection};
use mongodb::bson::{doc, DateTime as BsonDateTime, Document};
use tracing::debug;

pub struct MongoMeasurementRepository {
    collection: Collection<Document>,
}

impl MongoMeasurementRepository {
    pub fn new(client: Client, db_name: &str, collection_name: &str) -> Self {
        let db = client.database(db_name);
        let collection = db.collection(collection_name);
        Self { collection }
    }

    fn to_document(measurement: &Measurement) -> Document {
        doc! {
            "timestamp": BsonDateTime::from_chrono(measurement.timestamp),
            "binId": measurement.bin_id.as_str(),
            "value": measurement.value,
        }
    }
}

#[async_trait]
impl MeasurementRepository for MongoMeasurementRepository {
    async fn record_measurement(&self, measurement: &Measurement) -> Result<()> {
        self.collection.insert_one(Self::to_document(measurement)).await?;
        debug!(bin_id = %measurement.bin_id, "Stored measurement");
        Ok(())
    }

    async fn record_many(&self, measurements: &[Measurement]) -> Result<usize> {
        if measurements.is_empty() {
            return Ok(0);
        }

        let docs: Vec<Document> = measurements.iter().map(Self::to_document).collect();
        let result = self.collection.insert_many(docs).await?;
        debug!(count = result.inserted_ids.len(), "Stored measurement batch");
        Ok(result.inserted_ids.len())
    }
}
