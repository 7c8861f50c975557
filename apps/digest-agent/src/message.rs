/// Final text sent to the messaging platform: bracketed title, date line, digest body.
pub fn compose_message(header_title: &str, date: &str, body: &str) -> String {
    format!("【{}】\n\n{}\n\n{}", header_title, date, body)
}

/// Body used in place of a digest when the model call failed and the failure is delivered.
pub fn error_body(error: &dyn std::fmt::Display) -> String {
    format!("AI生成エラー: {}", error)
}
