use uuid::Uuid;

/// New record identifier for music and playlists.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

const STORED_RECORD_NAMESPACE: Uuid = Uuid::from_u128(0x5d1c_9a0e_7f42_4b38_a6e1_3c2f_8d90_b417);

/// Identifier for a stored record that was saved without one. The same
/// record content at the same position in `collection` always yields the
/// same id, so repeated uploads of unchanged local data collide remotely.
pub fn stored_record_id(collection: &str, index: usize, canonical: &str) -> String {
    let name = format!("{collection}\n{index}\n{canonical}");
    Uuid::new_v5(&STORED_RECORD_NAMESPACE, name.as_bytes()).to_string()
}

/// Time-ordered identifier used to correlate log lines and crash reports.
pub fn new_correlation_id() -> String {
    Uuid::now_v7().to_string()
}
