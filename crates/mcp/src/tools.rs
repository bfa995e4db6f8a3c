//! The four Tana node-creation tools: catalogue entries and argument parsing.

use {
    chrono::NaiveDate,
    serde::Deserialize,
    serde_json::{Value, json},
    tana_api::{NodeRequest, Supertag},
    tana_protocol::ToolDef,
    url::Url,
};

use crate::error::ToolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TanaTool {
    CreatePlainNode,
    CreateReferenceNode,
    CreateDateNode,
    CreateUrlNode,
}

impl TanaTool {
    pub const ALL: [Self; 4] = [
        Self::CreatePlainNode,
        Self::CreateReferenceNode,
        Self::CreateDateNode,
        Self::CreateUrlNode,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::CreatePlainNode => "create_plain_node",
            Self::CreateReferenceNode => "create_reference_node",
            Self::CreateDateNode => "create_date_node",
            Self::CreateUrlNode => "create_url_node",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::CreatePlainNode => "Create a plain text node in Tana",
            Self::CreateReferenceNode => "Create a reference node in Tana",
            Self::CreateDateNode => "Create a date node in Tana",
            Self::CreateUrlNode => "Create a URL node in Tana",
        }
    }

    /// The required field and its schema description.
    fn primary_field(&self) -> (&'static str, &'static str) {
        match self {
            Self::CreatePlainNode => ("name", "The name/content of the node"),
            Self::CreateReferenceNode => ("referenceId", "ID of the node to reference"),
            Self::CreateDateNode => ("date", "Date in YYYY-MM-DD format"),
            Self::CreateUrlNode => ("url", "The URL to create a node for"),
        }
    }

    pub fn input_schema(&self) -> Value {
        let (field, field_description) = self.primary_field();
        let mut properties = serde_json::Map::new();
        properties.insert(
            field.to_string(),
            json!({ "type": "string", "description": field_description }),
        );
        properties.insert(
            "description".into(),
            json!({ "type": "string", "description": "Optional description" }),
        );
        properties.insert(
            "targetNodeId".into(),
            json!({ "type": "string", "description": "Parent node ID (optional)" }),
        );
        properties.insert(
            "supertags".into(),
            json!({
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "id": { "type": "string" },
                        "fields": {
                            "type": "object",
                            "additionalProperties": { "type": "string" }
                        }
                    },
                    "required": ["id"]
                }
            }),
        );

        json!({
            "type": "object",
            "properties": properties,
            "required": [field],
        })
    }

    pub fn definition(&self) -> ToolDef {
        ToolDef {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }

    /// Validate `arguments` and turn them into the downstream request.
    pub fn parse_arguments(&self, arguments: Option<Value>) -> Result<NodeRequest, ToolError> {
        let args: NodeArguments = match arguments {
            None | Some(Value::Null) => NodeArguments::default(),
            Some(value @ Value::Object(_)) => serde_json::from_value(value)
                .map_err(|e| ToolError::invalid(format!("{}: {e}", self.name())))?,
            Some(_) => return Err(ToolError::invalid("arguments must be an object")),
        };

        let (field, _) = self.primary_field();
        let primary = match self {
            Self::CreatePlainNode => args.name.as_deref(),
            Self::CreateReferenceNode => args.reference_id.as_deref(),
            Self::CreateDateNode => args.date.as_deref(),
            Self::CreateUrlNode => args.url.as_deref(),
        }
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ToolError::invalid(format!("'{field}' is required")))?;

        let node = match self {
            Self::CreatePlainNode => NodeRequest::plain(primary),
            Self::CreateReferenceNode => NodeRequest::reference(primary),
            Self::CreateDateNode => NodeRequest::date(parse_date(primary)?),
            Self::CreateUrlNode => NodeRequest::url(validate_url(primary)?),
        };

        if args.supertags.iter().any(|t| t.id.trim().is_empty()) {
            return Err(ToolError::invalid("supertag id must not be empty"));
        }

        Ok(node
            .with_description(args.description.filter(|d| !d.is_empty()))
            .with_target(args.target_node_id.filter(|t| !t.is_empty()))
            .with_supertags(args.supertags))
    }
}

/// Every tool definition, in catalogue order.
pub fn catalogue() -> Vec<ToolDef> {
    TanaTool::ALL.iter().map(TanaTool::definition).collect()
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeArguments {
    name: Option<String>,
    reference_id: Option<String>,
    date: Option<String>,
    url: Option<String>,
    description: Option<String>,
    target_node_id: Option<String>,
    #[serde(default)]
    supertags: Vec<Supertag>,
}

fn parse_date(raw: &str) -> Result<NaiveDate, ToolError> {
    // `%Y` alone would accept five-digit years and unpadded parts.
    let well_formed = raw.len() == 10
        && raw
            .char_indices()
            .all(|(i, c)| if i == 4 || i == 7 { c == '-' } else { c.is_ascii_digit() });
    if !well_formed {
        return Err(ToolError::invalid(format!(
            "date must be in YYYY-MM-DD format, got '{raw}'"
        )));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| ToolError::invalid(format!("invalid date '{raw}': {e}")))
}

fn validate_url(raw: &str) -> Result<&str, ToolError> {
    let parsed =
        Url::parse(raw).map_err(|e| ToolError::invalid(format!("invalid url '{raw}': {e}")))?;
    match parsed.scheme() {
        "http" | "https" if parsed.has_host() => Ok(raw),
        _ => Err(ToolError::invalid(format!(
            "url must be an absolute http(s) URL, got '{raw}'"
        ))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn payload(node: &NodeRequest) -> Value {
        serde_json::to_value(node).unwrap()
    }

    #[test]
    fn catalogue_lists_four_tools_with_required_fields() {
        let tools = catalogue();
        let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, [
            "create_plain_node",
            "create_reference_node",
            "create_date_node",
            "create_url_node"
        ]);

        let required: Vec<&Value> = tools
            .iter()
            .map(|t| &t.input_schema["required"][0])
            .collect();
        assert_eq!(required, [
            &json!("name"),
            &json!("referenceId"),
            &json!("date"),
            &json!("url")
        ]);

        for tool in &tools {
            let props = &tool.input_schema["properties"];
            assert!(props.get("targetNodeId").is_some(), "{}", tool.name);
            assert!(props.get("supertags").is_some(), "{}", tool.name);
        }
    }

    #[test]
    fn lookup_by_name() {
        assert_eq!(
            TanaTool::from_name("create_url_node"),
            Some(TanaTool::CreateUrlNode)
        );
        assert_eq!(TanaTool::from_name("delete_node"), None);
    }

    #[test]
    fn plain_node_arguments() {
        let node = TanaTool::CreatePlainNode
            .parse_arguments(Some(json!({
                "name": "Test",
                "targetNodeId": "INBOX",
                "supertags": [{ "id": "task", "fields": { "status": "open" } }]
            })))
            .unwrap();
        assert_eq!(
            payload(&node),
            json!({
                "name": "Test",
                "targetNodeId": "INBOX",
                "supertags": [{ "id": "task", "fields": { "status": "open" } }]
            })
        );
    }

    #[test]
    fn missing_or_blank_required_field() {
        for args in [None, Some(json!({})), Some(json!({ "name": "  " }))] {
            let err = TanaTool::CreatePlainNode.parse_arguments(args).unwrap_err();
            assert!(err.to_string().contains("'name' is required"), "{err}");
        }
    }

    #[test]
    fn non_object_arguments_are_rejected() {
        let err = TanaTool::CreateReferenceNode
            .parse_arguments(Some(json!(["abc"])))
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[test]
    fn date_must_be_iso_calendar_date() {
        let node = TanaTool::CreateDateNode
            .parse_arguments(Some(json!({ "date": "2024-02-29" })))
            .unwrap();
        assert_eq!(payload(&node)["date"], "2024-02-29");

        for bad in ["2023-02-29", "2024-2-9", "24-02-09", "tomorrow", "20240-01-01"] {
            let result = TanaTool::CreateDateNode.parse_arguments(Some(json!({ "date": bad })));
            assert!(result.is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn url_must_be_absolute_http() {
        let node = TanaTool::CreateUrlNode
            .parse_arguments(Some(json!({ "url": "https://example.com", "description": "site" })))
            .unwrap();
        assert_eq!(
            payload(&node),
            json!({ "url": "https://example.com", "description": "site" })
        );

        for bad in ["example.com", "ftp://example.com/file", "mailto:a@b.c", "/relative"] {
            let result = TanaTool::CreateUrlNode.parse_arguments(Some(json!({ "url": bad })));
            assert!(result.is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn supertag_ids_are_required() {
        let err = TanaTool::CreatePlainNode
            .parse_arguments(Some(json!({ "name": "x", "supertags": [{ "id": "" }] })))
            .unwrap_err();
        assert!(err.to_string().contains("supertag id"));

        let err = TanaTool::CreatePlainNode
            .parse_arguments(Some(json!({ "name": "x", "supertags": [{ "fields": {} }] })))
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
