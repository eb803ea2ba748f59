//! Best-effort mapping of title ids to display names.

use std::collections::HashMap;

use quick_xml::events::Event;
use quick_xml::reader::Reader;
use tracing::{debug, warn};

use crate::domain::TitleId;
use crate::error::NusError;
use crate::fetch::Fetcher;

pub const DEFAULT_TITLE_DB_URL: &str = "https://3dsdb.com/xml.php";
pub const UNKNOWN_TITLE: &str = "Unknown Title";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TitleNames {
    names: HashMap<String, String>,
}

impl TitleNames {
    pub fn new(names: HashMap<String, String>) -> Self {
        Self { names }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn display_name(&self, title: &TitleId) -> &str {
        self.names
            .get(&title.upper())
            .map(String::as_str)
            .unwrap_or(UNKNOWN_TITLE)
    }
}

/// Never fails: a lookup that cannot be completed yields an empty mapping.
pub trait TitleNameLookup {
    fn titles(&self) -> TitleNames;
}

pub struct NoTitleDb;

impl TitleNameLookup for NoTitleDb {
    fn titles(&self) -> TitleNames {
        TitleNames::default()
    }
}

pub struct HttpTitleDb<'a, F: Fetcher> {
    fetcher: &'a F,
    url: String,
}

impl<'a, F: Fetcher> HttpTitleDb<'a, F> {
    pub fn new(fetcher: &'a F, url: impl Into<String>) -> Self {
        Self {
            fetcher,
            url: url.into(),
        }
    }
}

impl<F: Fetcher> TitleNameLookup for HttpTitleDb<'_, F> {
    fn titles(&self) -> TitleNames {
        let result = self
            .fetcher
            .fetch_bytes(&self.url)
            .and_then(|content| parse_title_db(&content));
        match result {
            Ok(names) => {
                debug!(count = names.len(), "loaded title database");
                names
            }
            Err(err) => {
                warn!(error = %err, "failed to fetch title database");
                TitleNames::default()
            }
        }
    }
}

#[derive(Clone, Copy)]
enum Field {
    Id,
    Name,
}

/// Reads `<title><titleid>..</titleid><name>..</name></title>` entries.
pub fn parse_title_db(content: &[u8]) -> Result<TitleNames, NusError> {
    let mut reader = Reader::from_reader(content);
    reader.trim_text(true);

    let mut names = HashMap::new();
    let mut buf = Vec::new();
    let mut field = None;
    let mut in_title = false;
    let mut id: Option<String> = None;
    let mut name: Option<String> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(tag)) => match tag.name().as_ref() {
                b"title" => {
                    in_title = true;
                    id = None;
                    name = None;
                }
                b"titleid" if in_title => field = Some(Field::Id),
                b"name" if in_title => field = Some(Field::Name),
                _ => field = None,
            },
            Ok(Event::Text(text)) => {
                let value = text
                    .unescape()
                    .map_err(|err| NusError::TitleDb(err.to_string()))?
                    .into_owned();
                assign(field, value, &mut id, &mut name);
            }
            Ok(Event::CData(text)) => {
                let value = String::from_utf8_lossy(&text.into_inner()).into_owned();
                assign(field, value, &mut id, &mut name);
            }
            Ok(Event::End(tag)) => match tag.name().as_ref() {
                b"title" => {
                    if let (Some(id), Some(name)) = (id.take(), name.take()) {
                        names.insert(id.trim().to_uppercase(), name);
                    }
                    in_title = false;
                    field = None;
                }
                _ => field = None,
            },
            Ok(Event::Eof) => break,
            Err(err) => return Err(NusError::TitleDb(err.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(TitleNames::new(names))
}

fn assign(field: Option<Field>, value: String, id: &mut Option<String>, name: &mut Option<String>) {
    match field {
        Some(Field::Id) => *id = Some(value),
        Some(Field::Name) => *name = Some(value),
        None => {}
    }
}
