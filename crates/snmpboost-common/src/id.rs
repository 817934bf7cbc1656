use snowflake::SnowflakeIdBucket;
use std::sync::Mutex;

static ID_GENERATOR: Mutex<Option<SnowflakeIdBucket>> = Mutex::new(None);

/// Initialize the Snowflake generator used for lease tokens and request ids.
///
/// `machine_id`: machine identifier (0-31)
/// `node_id`: node identifier (0-31)
pub fn init(machine_id: i32, node_id: i32) {
    let mut gen = ID_GENERATOR.lock().unwrap_or_else(|e| e.into_inner());
    *gen = Some(SnowflakeIdBucket::new(machine_id, node_id));
}

fn next_raw() -> i64 {
    let mut gen = ID_GENERATOR.lock().unwrap_or_else(|e| e.into_inner());
    let bucket = gen.get_or_insert_with(|| SnowflakeIdBucket::new(1, 1));
    bucket.get_id()
}

/// Next unique id as a string (lease tokens).
pub fn next_id() -> String {
    next_raw().to_string()
}

/// Next SNMP request id. Only the low 31 bits are kept so the value fits the
/// positive range of the PDU `request-id` field.
pub fn next_request_id() -> i32 {
    (next_raw() & 0x7fff_ffff) as i32
}
