pub fn usage_json_fixture() -> &'static str {
    return r#"{"used":3,"limit":10,"remaining":7,"userType":"free","canUse":true}"#;
}

/// A generation body with a usage event between two text runs.
pub fn streamed_body_fixture() -> String {
    return format!(
        "Hello <<<USAGE>>>{}<<<END_USAGE>>>world",
        usage_json_fixture()
    );
}

/// Splits a payload into byte chunks of `size`, the way a transport might
/// deliver it.
pub fn chunked(payload: &str, size: usize) -> Vec<Vec<u8>> {
    return payload
        .as_bytes()
        .chunks(size)
        .map(|chunk| return chunk.to_vec())
        .collect();
}
