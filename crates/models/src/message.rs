/// TaskDispatch fans one chunk of a crack request out to a worker.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDispatch {
    #[serde(rename = "requestID")]
    pub request_id: String,
    pub part_number: u64,
    pub part_count: u64,
    pub hash: String,
    pub max_length: u32,
    pub alphabet: Alphabet,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Alphabet {
    pub symbols: Vec<String>,
}

/// TaskResult streams a worker's progress for one chunk back to the
/// manager. `answer` is present for non-error snapshots, `error` for
/// error snapshots.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    #[serde(rename = "requestID")]
    pub request_id: String,
    pub part_number: u64,
    pub status: ResultStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<Answer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Answer {
    pub words: Vec<String>,
    pub percent: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultStatus {
    InProgress,
    Success,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    // Workers from the original deployment interoperate with this
    // manager, so the wire field names are load-bearing.
    #[test]
    fn dispatch_wire_format() {
        let msg = TaskDispatch {
            request_id: "67e55044f0df4f1a".to_string(),
            part_number: 2,
            part_count: 3,
            hash: "acbd18db4cc2f85cedef654fccc4a4d8".to_string(),
            max_length: 4,
            alphabet: Alphabet {
                symbols: vec!["a".to_string(), "b".to_string()],
            },
        };
        let value = serde_json::to_value(&msg).unwrap();

        assert_eq!(value["requestID"], "67e55044f0df4f1a");
        assert_eq!(value["partNumber"], 2);
        assert_eq!(value["partCount"], 3);
        assert_eq!(value["maxLength"], 4);
        assert_eq!(value["alphabet"]["symbols"][1], "b");
    }

    #[test]
    fn result_omits_empty_sections() {
        let msg = TaskResult {
            request_id: "67e55044f0df4f1a".to_string(),
            part_number: 0,
            status: ResultStatus::Success,
            answer: Some(Answer {
                words: vec!["cab".to_string()],
                percent: 100.0,
            }),
            error: None,
        };
        let value = serde_json::to_value(&msg).unwrap();

        assert_eq!(value["status"], "SUCCESS");
        assert_eq!(value["answer"]["words"][0], "cab");
        assert!(value.get("error").is_none());
    }
}
