//! Reassembles streamed tool-call fragments into complete invocations.

use std::collections::BTreeMap;

use conduit_types::{ConduitError, ResponseFragment, ToolInvocation};

/// A tool call still being streamed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// Everything one streamed response amounted to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregatedResponse {
    pub content: String,
    pub invocations: Vec<ToolInvocation>,
}

/// Accumulates the fragments of one streamed response.
///
/// Slots are keyed by the model-assigned tool-call index. Indices may arrive
/// out of order or with gaps; only slots that were actually mentioned exist.
#[derive(Debug, Default)]
pub struct ToolCallAggregator {
    content: String,
    slots: BTreeMap<usize, PendingToolCall>,
}

impl ToolCallAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one fragment in. Text is handed to `on_text` as it arrives.
    pub fn push(&mut self, fragment: ResponseFragment, mut on_text: impl FnMut(&str)) {
        if let Some(text) = fragment.content {
            if !text.is_empty() {
                on_text(&text);
                self.content.push_str(&text);
            }
        }

        for delta in fragment.tool_calls {
            let slot = self.slots.entry(delta.index).or_default();
            if let Some(id) = delta.id {
                if !id.is_empty() {
                    slot.id = id;
                }
            }
            if let Some(name) = delta.name {
                slot.name.push_str(&name);
            }
            if let Some(arguments) = delta.arguments {
                slot.arguments.push_str(&arguments);
            }
        }
    }

    /// Text accumulated so far.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Parse every named slot into an invocation, in slot order.
    ///
    /// Slots that never got a name are dropped. Empty argument text means
    /// `{}`; anything else must be valid JSON.
    pub fn finish(self) -> Result<AggregatedResponse, ConduitError> {
        let mut invocations = Vec::new();
        for slot in self.slots.into_values() {
            if slot.name.is_empty() {
                continue;
            }
            let arguments = if slot.arguments.trim().is_empty() {
                serde_json::Value::Object(serde_json::Map::new())
            } else {
                serde_json::from_str(&slot.arguments).map_err(|e| ConduitError::ArgumentParse {
                    tool: slot.name.clone(),
                    message: e.to_string(),
                })?
            };
            let id = if slot.id.is_empty() {
                format!("call_{}", uuid::Uuid::new_v4().simple())
            } else {
                slot.id
            };
            invocations.push(ToolInvocation {
                id,
                name: slot.name,
                arguments,
                raw_arguments: slot.arguments,
            });
        }

        Ok(AggregatedResponse {
            content: self.content,
            invocations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_types::ToolCallDelta;

    fn delta(index: usize, id: Option<&str>, name: Option<&str>, args: Option<&str>) -> ResponseFragment {
        ResponseFragment::tool_call(ToolCallDelta {
            index,
            id: id.map(str::to_string),
            name: name.map(str::to_string),
            arguments: args.map(str::to_string),
        })
    }

    fn aggregate(fragments: Vec<ResponseFragment>) -> AggregatedResponse {
        let mut agg = ToolCallAggregator::new();
        for f in fragments {
            agg.push(f, |_| {});
        }
        agg.finish().unwrap()
    }

    #[test]
    fn reassembles_split_name_and_arguments() {
        let response = aggregate(vec![
            delta(0, Some("call_1"), Some("get_"), Some("{\"city\":")),
            delta(0, None, Some("weather"), Some("\"NY\"}")),
        ]);
        assert_eq!(response.invocations.len(), 1);
        let call = &response.invocations[0];
        assert_eq!(call.id, "call_1");
        assert_eq!(call.name, "get_weather");
        assert_eq!(call.arguments, serde_json::json!({"city": "NY"}));
        assert_eq!(call.raw_arguments, "{\"city\":\"NY\"}");
    }

    #[test]
    fn out_of_order_slots_keep_earlier_data() {
        let response = aggregate(vec![
            delta(3, Some("c3"), Some("later"), Some("{}")),
            delta(1, Some("c1"), Some("earlier"), Some("{\"a\":1}")),
        ]);
        let names: Vec<&str> = response.invocations.iter().map(|c| c.name.as_str()).collect();
        // Ordered by slot index, not arrival
        assert_eq!(names, vec!["earlier", "later"]);
        assert_eq!(response.invocations[0].arguments["a"], 1);
    }

    #[test]
    fn chunking_does_not_change_result() {
        let whole = aggregate(vec![
            ResponseFragment::text("Let me check."),
            delta(0, Some("call_x"), Some("search"), Some("{\"q\":\"rust async\"}")),
        ]);

        let text = "Let me check.";
        let args = "{\"q\":\"rust async\"}";
        let mut pieces = Vec::new();
        for ch in text.chars() {
            pieces.push(ResponseFragment::text(ch.to_string()));
        }
        pieces.push(delta(0, Some("call_x"), Some("sea"), None));
        pieces.push(delta(0, None, Some("rch"), None));
        for ch in args.chars() {
            pieces.push(delta(0, None, None, Some(&ch.to_string())));
        }
        assert_eq!(aggregate(pieces), whole);
    }

    #[test]
    fn text_is_forwarded_as_it_arrives() {
        let mut agg = ToolCallAggregator::new();
        let mut seen = Vec::new();
        agg.push(ResponseFragment::text("Hel"), |t| seen.push(t.to_string()));
        agg.push(ResponseFragment::text("lo"), |t| seen.push(t.to_string()));
        assert_eq!(seen, vec!["Hel", "lo"]);
        assert_eq!(agg.content(), "Hello");
        let response = agg.finish().unwrap();
        assert_eq!(response.content, "Hello");
        assert!(response.invocations.is_empty());
    }

    #[test]
    fn extreme_slot_indices_are_accepted() {
        let response = aggregate(vec![
            delta(usize::MAX, Some("c_max"), Some("echo"), Some("{\"text\":\"hi\"}")),
            delta(1 << 40, Some("c_big"), Some("ping"), None),
            delta(usize::MAX, None, None, None),
        ]);
        let ids: Vec<&str> = response.invocations.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c_big", "c_max"]);
        assert_eq!(response.invocations[1].arguments["text"], "hi");
    }

    #[test]
    fn slot_with_only_an_id_is_dropped() {
        let response = aggregate(vec![
            delta(0, Some("orphan"), None, Some("{}")),
            delta(2, Some("c2"), Some("list"), None),
        ]);
        assert_eq!(response.invocations.len(), 1);
        assert_eq!(response.invocations[0].id, "c2");
    }

    #[test]
    fn empty_arguments_become_empty_object() {
        let response = aggregate(vec![delta(0, Some("c"), Some("list"), None)]);
        assert_eq!(response.invocations[0].arguments, serde_json::json!({}));
    }

    #[test]
    fn missing_id_is_generated() {
        let response = aggregate(vec![delta(0, None, Some("ping"), Some("{}"))]);
        assert!(response.invocations[0].id.starts_with("call_"));
        assert!(response.invocations[0].id.len() > "call_".len());
    }

    #[test]
    fn invalid_arguments_fail_the_response() {
        let mut agg = ToolCallAggregator::new();
        agg.push(delta(0, Some("c"), Some("echo"), Some("{\"x\":")), |_| {});
        match agg.finish() {
            Err(ConduitError::ArgumentParse { tool, .. }) => assert_eq!(tool, "echo"),
            other => panic!("Expected ArgumentParse, got {other:?}"),
        }
    }
}
