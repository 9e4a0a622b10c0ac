use std::time::SystemTime;

use carbon_exporter::{
    CarbonExporterBuilder, DataPoint, Metric, MetricBatch, PointValue, ResourceGroup,
};

fn main() {
    tracing_subscriber::fmt::init();

    let exporter = CarbonExporterBuilder::default()
        .with_endpoint("localhost:2003")
        .expect("failed to parse endpoint")
        .with_resource_to_telemetry(true)
        .build()
        .expect("failed to build exporter");

    exporter.start().expect("failed to start exporter");

    let now = SystemTime::now();

    let mut requests = Metric::sum("demo.requests_total");
    requests.points.push(
        DataPoint::at(now, PointValue::Integer(128)).with_attribute("endpoint", "/api/v1"),
    );

    let mut temperature = Metric::gauge("demo.temperature_celsius");
    temperature.points.push(DataPoint::at(now, PointValue::Float(21.5)));

    let mut group = ResourceGroup::default();
    group.resource.insert("service.name".to_string(), "demo".to_string());
    group.metrics.extend([requests, temperature]);

    let batch = MetricBatch { resource_groups: vec![group] };
    match exporter.consume_metrics(&batch) {
        Ok(()) => println!("delivered {} data points", batch.point_count()),
        Err(e) => eprintln!("delivery failed: {e}"),
    }

    exporter.shutdown();
}
