use crate::batch::{Attributes, MetricBatch, PointValue};

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// The encoded form of a metric batch.
///
/// Lines are stored contiguously in one buffer so the whole batch can be handed to the
/// socket as a single logical write, with per-line offsets kept alongside so individual
/// lines stay addressable. Once encoded, lines are immutable: they are never rewritten
/// or merged before hitting the wire.
pub struct EncodeResult {
    buf: String,
    offsets: Vec<usize>,
    dropped: u64,
}

impl EncodeResult {
    const fn new() -> Self {
        Self { buf: String::new(), offsets: Vec::new(), dropped: 0 }
    }

    /// Returns the concatenated lines as a single byte slice, ready for the wire.
    pub fn as_bytes(&self) -> &[u8] {
        self.buf.as_bytes()
    }

    /// Returns `true` if the batch produced no lines.
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Returns the number of lines produced.
    pub fn line_count(&self) -> usize {
        self.offsets.len()
    }

    /// Returns the number of data points that had no plaintext representation.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Iterates over the produced lines, each including its trailing newline.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.offsets.iter().scan(0, |start, &end| {
            let line = &self.buf[*start..end];
            *start = end;
            Some(line)
        })
    }
}

/// Encodes a metric batch into Carbon plaintext lines.
///
/// Each data point of a scalar kind (gauge or sum) produces exactly one line of the form
/// `name;tag1=val1;tag2=val2 value unix-seconds\n`, with the `;` separators omitted when
/// the tag set is empty. Points of non-scalar kinds, and scalar points carrying no
/// value, are counted as dropped and never abort encoding of the rest of the batch.
///
/// When `merge_resource_attrs` is set, each point's tag set additionally includes the
/// resource attributes of its group, except under keys the point already defines.
///
/// Encoding is deterministic: tags are sorted by key (ties broken on the value), and
/// numeric formatting is canonical, so the same batch always yields identical bytes.
pub fn encode(batch: &MetricBatch, merge_resource_attrs: bool) -> EncodeResult {
    let mut result = EncodeResult::new();
    let mut int_writer = itoa::Buffer::new();
    let mut float_writer = ryu::Buffer::new();
    let mut ts_writer = itoa::Buffer::new();
    let mut tags: Vec<(&str, &str)> = Vec::new();

    for group in &batch.resource_groups {
        let resource = if merge_resource_attrs { Some(&group.resource) } else { None };

        for metric in &group.metrics {
            for point in &metric.points {
                if !metric.kind.is_scalar() {
                    result.dropped += 1;
                    continue;
                }

                let value = match point.value {
                    PointValue::Integer(value) => int_writer.format(value),
                    // `ryu` renders the shortest decimal form that round-trips, and
                    // falls back to "NaN"/"inf" for non-finite values.
                    PointValue::Float(value) => float_writer.format(value),
                    PointValue::Empty => {
                        result.dropped += 1;
                        continue;
                    }
                };

                tags.clear();
                collect_tags(&mut tags, &point.attributes, resource);

                result.buf.push_str(&metric.name);
                for (key, tag_value) in &tags {
                    result.buf.push(';');
                    result.buf.push_str(key);
                    result.buf.push('=');
                    result.buf.push_str(tag_value);
                }
                result.buf.push(' ');
                result.buf.push_str(value);
                result.buf.push(' ');
                result.buf.push_str(ts_writer.format(point.timestamp / NANOS_PER_SEC));
                result.buf.push('\n');
                result.offsets.push(result.buf.len());
            }
        }
    }

    result
}

/// Builds the sorted tag set for one data point.
///
/// Point attributes are more specific than resource attributes, so on key collision the
/// point's value wins and the resource's entry is skipped entirely.
fn collect_tags<'a>(
    tags: &mut Vec<(&'a str, &'a str)>,
    point: &'a Attributes,
    resource: Option<&'a Attributes>,
) {
    tags.extend(point.iter().map(|(key, value)| (key.as_str(), value.as_str())));

    if let Some(resource) = resource {
        for (key, value) in resource {
            if !point.contains_key(key) {
                tags.push((key.as_str(), value.as_str()));
            }
        }
    }

    tags.sort_by(|a, b| a.0.cmp(b.0).then_with(|| a.1.cmp(b.1)));
}
