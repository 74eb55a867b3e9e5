pub mod inventory_sink;
pub mod metric_sink;

pub use inventory_sink::{HttpInventorySink, InventoryAction, InventoryItem, InventorySink, NullInventorySink};
pub use metric_sink::{DryRunMetricSink, MetricItem, MetricSendResult, MetricSink, TcpMetricSink};
