use log::{debug, info, warn};
use rdkafka::consumer::{ConsumerContext, Rebalance};
use rdkafka::error::KafkaResult;
use rdkafka::ClientContext;
use rdkafka::TopicPartitionList;

pub struct AlertsContext;

impl ClientContext for AlertsContext {}

impl ConsumerContext for AlertsContext {
    fn pre_rebalance(&self, rebalance: &Rebalance) {
        info!("Pre rebalance {:?}", rebalance);
    }

    fn post_rebalance(&self, rebalance: &Rebalance) {
        info!("Post rebalance {:?}", rebalance);
    }

    fn commit_callback(&self, result: KafkaResult<()>, offsets: &TopicPartitionList) {
        match result {
            Ok(()) => debug!("Committed offsets: {:?}", offsets),
            Err(e) => warn!("Offsets commit failed: {}", e),
        }
    }
}
