use std::collections::BTreeMap;
use std::fmt;

/// Separators between fields of a reply. Servers use `:` inside one
/// section and `;` between sections; both split fields here.
pub const FIELD_DELIMITERS: [char; 2] = [':', ';'];
pub const PAIR_DELIMITER: char = '=';

/// Object count field, newest server naming first.
pub const OBJECT_COUNT_FIELDS: [&str; 2] = ["objects", "n_objects"];

const SETS_PREFIX: &str = "sets/";
const SET_CONFIG_PREFIX: &str = "set-config:";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AdminCommand {
    /// Drop every record of a set on the receiving node.
    DeleteSet { namespace: String, set: String },
    /// Per-node statistics of a set, including its object count.
    SetStats { namespace: String, set: String },
}

impl AdminCommand {
    pub fn delete_set(namespace: impl Into<String>, set: impl Into<String>) -> Self {
        AdminCommand::DeleteSet {
            namespace: namespace.into(),
            set: set.into(),
        }
    }

    pub fn set_stats(namespace: impl Into<String>, set: impl Into<String>) -> Self {
        AdminCommand::SetStats {
            namespace: namespace.into(),
            set: set.into(),
        }
    }

    /// Encode the command as the single-line string sent to a node
    ///
    /// Format:
    /// - DeleteSet: `set-config:context=namespace;id=<ns>;set=<set>;set-delete=true;`
    /// - SetStats: `sets/<ns>/<set>`
    pub fn to_wire(&self) -> String {
        match self {
            AdminCommand::DeleteSet { namespace, set } => format!(
                "{SET_CONFIG_PREFIX}context=namespace;id={namespace};set={set};set-delete=true;"
            ),
            AdminCommand::SetStats { namespace, set } => format!("{SETS_PREFIX}{namespace}/{set}"),
        }
    }

    /// Decode a command string received by a node
    pub fn parse(wire: &str) -> Result<Self, String> {
        let wire = wire.trim();

        if let Some(path) = wire.strip_prefix(SETS_PREFIX) {
            let mut parts = path.split('/');
            return match (parts.next(), parts.next(), parts.next()) {
                (Some(namespace), Some(set), None) if !namespace.is_empty() && !set.is_empty() => {
                    Ok(AdminCommand::set_stats(namespace, set))
                }
                _ => Err(format!("Invalid sets command: '{wire}'")),
            };
        }

        if let Some(params) = wire.strip_prefix(SET_CONFIG_PREFIX) {
            let params = parse_pairs(params, &[';'])?;
            let param = |name: &str| {
                params
                    .get(name)
                    .map(String::as_str)
                    .ok_or_else(|| format!("Invalid set-config: missing '{name}'"))
            };

            if param("context")? != "namespace" {
                return Err("Invalid set-config: context must be 'namespace'".to_string());
            }
            if param("set-delete")? != "true" {
                return Err("Invalid set-config: only set-delete=true is supported".to_string());
            }
            return Ok(AdminCommand::delete_set(param("id")?, param("set")?));
        }

        Err(format!("Unknown command: '{wire}'"))
    }
}

impl fmt::Display for AdminCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wire())
    }
}

/// A node's reply, classified.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AdminReply {
    /// Bare `ok`, the answer to configuration commands.
    Ack,
    /// Nothing at all; servers answer this way for a set they never saw.
    Empty,
    Fields(InfoResponse),
}

impl AdminReply {
    /// Parse a raw reply. Server error replies (`ERROR...`) and malformed
    /// field lists are both errors, carrying the reason.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw = Self::reject_error(raw)?;

        if raw.is_empty() {
            return Ok(AdminReply::Empty);
        }
        if raw.eq_ignore_ascii_case("ok") {
            return Ok(AdminReply::Ack);
        }
        InfoResponse::parse(raw).map(AdminReply::Fields)
    }

    /// Fails on a server error reply and passes any other body through,
    /// trimmed and unparsed.
    pub fn reject_error(raw: &str) -> Result<&str, String> {
        let raw = raw.trim();
        if raw.get(..5).is_some_and(|head| head.eq_ignore_ascii_case("error")) {
            return Err(format!("Server replied with error: {raw}"));
        }
        Ok(raw)
    }
}

/// `key=value` fields of one reply.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InfoResponse {
    fields: BTreeMap<String, String>,
}

impl InfoResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.fields.insert(name.into(), value.to_string());
        self
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        Ok(Self {
            fields: parse_pairs(raw, &FIELD_DELIMITERS)?,
        })
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn get_u64(&self, name: &str) -> Result<Option<u64>, String> {
        self.get(name)
            .map(|value| {
                value
                    .parse::<u64>()
                    .map_err(|e| format!("Field '{name}' is not a count ('{value}'): {e}"))
            })
            .transpose()
    }

    /// Object count under the first field name this server uses.
    pub fn object_count(&self) -> Result<u64, String> {
        for name in OBJECT_COUNT_FIELDS {
            if let Some(count) = self.get_u64(name)? {
                return Ok(count);
            }
        }
        Err(format!(
            "Reply has no object count (looked for {})",
            OBJECT_COUNT_FIELDS.join(", ")
        ))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn to_wire(&self) -> String {
        self.fields
            .iter()
            .map(|(name, value)| format!("{name}{PAIR_DELIMITER}{value}"))
            .collect::<Vec<_>>()
            .join(":")
    }
}

fn parse_pairs(raw: &str, delimiters: &[char]) -> Result<BTreeMap<String, String>, String> {
    let mut fields = BTreeMap::new();
    for pair in raw.split(delimiters).filter(|pair| !pair.trim().is_empty()) {
        let (name, value) = pair
            .split_once(PAIR_DELIMITER)
            .ok_or_else(|| format!("Malformed field '{pair}': expected name{PAIR_DELIMITER}value"))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(format!("Malformed field '{pair}': empty name"));
        }
        fields.insert(name.to_string(), value.trim().to_string());
    }
    Ok(fields)
}
