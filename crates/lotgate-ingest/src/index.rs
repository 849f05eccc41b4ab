//! XML index to document records
//!
//! Index layout:
//!
//! ```xml
//! <LOTTOLAVORAZIONE id="0042">
//!   <FALDONE ID="F-001">                      <!-- folder: any tag, ID attr -->
//!     <REFLAVORO>
//!       <RIFERIMENTO>                         <!-- reference: any tag -->
//!         <DESCRIZIONE>Invoice</DESCRIZIONE>
//!         <PAGINE>1-3</PAGINE>
//!         <PRESENTE_NEL_FALDONE>Y</PRESENTE_NEL_FALDONE>
//!         <NUMERO>17</NUMERO>
//!         <ID>DOC-9</ID>
//!         <FILE>
//!           <NOME>invoice.pdf</NOME>
//!           <PERCORSO>\PDF\0001\</PERCORSO>
//!         </FILE>
//!       </RIFERIMENTO>
//!     </REFLAVORO>
//!   </FALDONE>
//! </LOTTOLAVORAZIONE>
//! ```
//!
//! The lot id comes from the last `LOTTOLAVORAZIONE` element in document
//! order, wherever it sits. Folders are the direct children of the document
//! root.

use crate::error::ExtractionError;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

pub const LOT_JOB_TAG: &str = "LOTTOLAVORAZIONE";
const LOT_JOB_ID_ATTR: &str = "id";
const FOLDER_ID_ATTR: &str = "ID";
const REFERENCES_TAG: &str = "REFLAVORO";
const DESCRIPTION_TAG: &str = "DESCRIZIONE";
const PAGES_TAG: &str = "PAGINE";
const PRESENT_TAG: &str = "PRESENTE_NEL_FALDONE";
const NUMBER_TAG: &str = "NUMERO";
const DOCUMENT_ID_TAG: &str = "ID";
const FILE_TAG: &str = "FILE";
const FILE_NAME_TAG: &str = "NOME";
const FILE_PATH_TAG: &str = "PERCORSO";

/// One reference of the index, as submitted to the ingestion API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    #[serde(rename = "lotto")]
    pub lot_id: String,
    pub label: String,
    pub reference_description: String,
    pub pages: String,
    pub present_in_folder: bool,
    #[serde(rename = "reference")]
    pub reference_number: String,
    pub document_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_relative_url: Option<String>,
}

impl DocumentRecord {
    /// False for records submitted without a file reference
    pub fn has_file(&self) -> bool {
        self.file_relative_url.is_some()
    }
}

/// Minimal element tree; only what the index walk needs
#[derive(Debug, Default)]
struct XmlNode {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<XmlNode>,
    text: String,
}

impl XmlNode {
    fn from_start(start: &BytesStart<'_>) -> Result<Self, ExtractionError> {
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| ExtractionError::Xml(e.to_string()))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|e| ExtractionError::Xml(e.to_string()))?
                .into_owned();
            attributes.push((key, value));
        }
        Ok(Self {
            name,
            attributes,
            ..Self::default()
        })
    }

    fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Trimmed text of a child; `None` when absent or empty
    fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name)
            .map(|c| c.text.trim())
            .filter(|t| !t.is_empty())
    }

    /// Last element named `name` in document order, self included
    fn find_last(&self, name: &str) -> Option<&XmlNode> {
        self.children
            .iter()
            .rev()
            .find_map(|c| c.find_last(name))
            .or_else(|| (self.name == name).then_some(self))
    }
}

fn parse_tree(content: &str) -> Result<XmlNode, ExtractionError> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<XmlNode> = Vec::new();
    let mut root: Option<XmlNode> = None;

    let close = |node: XmlNode, stack: &mut Vec<XmlNode>, root: &mut Option<XmlNode>| {
        match stack.last_mut() {
            Some(parent) => parent.children.push(node),
            None if root.is_none() => *root = Some(node),
            None => {},
        }
    };

    loop {
        match reader.read_event()? {
            Event::Start(start) => stack.push(XmlNode::from_start(&start)?),
            Event::Empty(start) => close(XmlNode::from_start(&start)?, &mut stack, &mut root),
            Event::End(_) => {
                if let Some(node) = stack.pop() {
                    close(node, &mut stack, &mut root);
                }
            },
            Event::Text(text) => {
                if let Some(node) = stack.last_mut() {
                    let text = text
                        .unescape()
                        .map_err(|e| ExtractionError::Xml(e.to_string()))?;
                    node.text.push_str(&text);
                }
            },
            Event::CData(data) => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            },
            Event::Eof => break,
            _ => {},
        }
    }

    if !stack.is_empty() {
        return Err(ExtractionError::Xml("unexpected end of document".to_string()));
    }
    root.ok_or_else(|| ExtractionError::Xml("document has no root element".to_string()))
}

/// Turns a lot's XML index into [`DocumentRecord`]s
#[derive(Debug, Clone)]
pub struct DocumentIndexExtractor {
    url_prefix: String,
}

impl DocumentIndexExtractor {
    pub fn new(url_prefix: impl Into<String>) -> Self {
        Self {
            url_prefix: url_prefix.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn extract_file(
        &self,
        path: &Path,
        batch_token: &str,
    ) -> Result<Vec<DocumentRecord>, ExtractionError> {
        info!(index = %path.display(), "Extracting document records");
        let content = std::fs::read_to_string(path).map_err(|source| ExtractionError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.extract(&content, batch_token)
    }

    /// Records in document order; the same input always yields the same list
    pub fn extract(
        &self,
        content: &str,
        batch_token: &str,
    ) -> Result<Vec<DocumentRecord>, ExtractionError> {
        let root = parse_tree(content)?;

        let lot_id = root
            .find_last(LOT_JOB_TAG)
            .and_then(|job| job.attribute(LOT_JOB_ID_ATTR))
            .ok_or(ExtractionError::MissingLotJob { tag: LOT_JOB_TAG })?
            .to_string();
        debug!(%lot_id, "Found lot job");

        let mut records = Vec::new();
        for folder in &root.children {
            let label = folder
                .attribute(FOLDER_ID_ATTR)
                .ok_or_else(|| ExtractionError::MissingAttribute {
                    element: folder.name.clone(),
                    attribute: FOLDER_ID_ATTR,
                })?;

            let Some(references) = folder.child(REFERENCES_TAG) else {
                warn!(%label, "Folder has no <{}> element; no records", REFERENCES_TAG);
                continue;
            };

            for reference in &references.children {
                records.push(self.record(&lot_id, label, reference, batch_token)?);
            }
        }

        info!(%lot_id, records = records.len(), "Extracted document records");
        Ok(records)
    }

    fn record(
        &self,
        lot_id: &str,
        label: &str,
        reference: &XmlNode,
        batch_token: &str,
    ) -> Result<DocumentRecord, ExtractionError> {
        let text = |tag: &str| reference.child_text(tag).unwrap_or_default().to_string();
        let document_id = reference.child_text(DOCUMENT_ID_TAG);

        let file = reference.child(FILE_TAG);
        let filename = file.and_then(|f| f.child_text(FILE_NAME_TAG));
        let source_path = file.and_then(|f| f.child_text(FILE_PATH_TAG));

        let file_relative_url = match source_path {
            Some(source_path) => Some(self.resolve_url(
                label,
                document_id,
                source_path,
                filename,
                batch_token,
            )?),
            None => {
                warn!(
                    %label,
                    document_id = document_id.unwrap_or_default(),
                    filename = filename.unwrap_or_default(),
                    "Reference has no source path; submitting without file"
                );
                None
            },
        };

        Ok(DocumentRecord {
            lot_id: lot_id.to_string(),
            label: label.to_string(),
            reference_description: text(DESCRIPTION_TAG),
            pages: text(PAGES_TAG),
            present_in_folder: reference.child_text(PRESENT_TAG) == Some("Y"),
            reference_number: text(NUMBER_TAG),
            document_id: document_id.unwrap_or_default().to_string(),
            file_relative_url,
        })
    }

    /// `<prefix>/<batch_token>/<segment 2>/<segment 3>/<filename>`
    fn resolve_url(
        &self,
        label: &str,
        document_id: Option<&str>,
        source_path: &str,
        filename: Option<&str>,
        batch_token: &str,
    ) -> Result<String, ExtractionError> {
        let malformed = || ExtractionError::MalformedPath {
            label: label.to_string(),
            document_id: document_id.map(str::to_string),
            path: source_path.to_string(),
        };

        let segments: Vec<&str> = source_path.split('\\').collect();
        if segments.len() < 3 {
            return Err(malformed());
        }
        let filename = filename.ok_or_else(malformed)?;

        let url = format!(
            "{}/{}/{}/{}/{}",
            self.url_prefix, batch_token, segments[1], segments[2], filename
        );
        debug!(%url, "Resolved file url");
        Ok(url)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const TOKEN: &str = "2024_03_07_0042";

    const TWO_REFERENCES: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<LOTTOLAVORAZIONE id="0042">
  <FALDONE ID="F-001">
    <REFLAVORO>
      <RIFERIMENTO>
        <DESCRIZIONE>Invoice &amp; receipt</DESCRIZIONE>
        <PAGINE>1-3</PAGINE>
        <PRESENTE_NEL_FALDONE>Y</PRESENTE_NEL_FALDONE>
        <NUMERO>17</NUMERO>
        <ID>DOC-9</ID>
        <FILE>
          <NOME>invoice.pdf</NOME>
          <PERCORSO>\PDF\0001\</PERCORSO>
        </FILE>
      </RIFERIMENTO>
      <RIFERIMENTO>
        <DESCRIZIONE>Contract</DESCRIZIONE>
        <PAGINE>4</PAGINE>
        <PRESENTE_NEL_FALDONE>N</PRESENTE_NEL_FALDONE>
        <NUMERO>18</NUMERO>
        <ID>DOC-10</ID>
        <FILE>
          <NOME>contract.pdf</NOME>
          <PERCORSO></PERCORSO>
        </FILE>
      </RIFERIMENTO>
    </REFLAVORO>
  </FALDONE>
</LOTTOLAVORAZIONE>
"#;

    fn extractor() -> DocumentIndexExtractor {
        DocumentIndexExtractor::new("documents/")
    }

    #[test]
    fn test_folder_with_two_references() {
        let records = extractor().extract(TWO_REFERENCES, TOKEN).unwrap();

        assert_eq!(
            records,
            vec![
                DocumentRecord {
                    lot_id: "0042".to_string(),
                    label: "F-001".to_string(),
                    reference_description: "Invoice & receipt".to_string(),
                    pages: "1-3".to_string(),
                    present_in_folder: true,
                    reference_number: "17".to_string(),
                    document_id: "DOC-9".to_string(),
                    file_relative_url: Some(
                        "documents/2024_03_07_0042/PDF/0001/invoice.pdf".to_string()
                    ),
                },
                DocumentRecord {
                    lot_id: "0042".to_string(),
                    label: "F-001".to_string(),
                    reference_description: "Contract".to_string(),
                    pages: "4".to_string(),
                    present_in_folder: false,
                    reference_number: "18".to_string(),
                    document_id: "DOC-10".to_string(),
                    file_relative_url: None,
                },
            ]
        );
        assert!(!records[1].has_file());
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let first = extractor().extract(TWO_REFERENCES, TOKEN).unwrap();
        let second = extractor().extract(TWO_REFERENCES, TOKEN).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_wire_format() {
        let records = extractor().extract(TWO_REFERENCES, TOKEN).unwrap();
        let with_file = serde_json::to_value(&records[0]).unwrap();
        assert_eq!(with_file["lotto"], "0042");
        assert_eq!(with_file["reference"], "17");
        assert_eq!(with_file["present_in_folder"], true);

        let without_file = serde_json::to_value(&records[1]).unwrap();
        assert!(without_file.get("file_relative_url").is_none());
    }

    #[test]
    fn test_missing_lot_job() {
        let xml = r#"<ROOT><FALDONE ID="F"><REFLAVORO/></FALDONE></ROOT>"#;
        let err = extractor().extract(xml, TOKEN).unwrap_err();
        assert!(matches!(err, ExtractionError::MissingLotJob { .. }));
    }

    #[test]
    fn test_lot_job_found_below_root() {
        let xml = r#"<ROOT>
            <FALDONE ID="F"><REFLAVORO><R><ID>1</ID></R></REFLAVORO></FALDONE>
            <INFO ID="meta"><LOTTOLAVORAZIONE id="77"/></INFO>
        </ROOT>"#;
        let records = extractor().extract(xml, TOKEN).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].lot_id, "77");
        assert_eq!(records[0].document_id, "1");
    }

    #[test]
    fn test_last_lot_job_wins() {
        let xml = r#"<LOTTOLAVORAZIONE id="1">
            <F ID="A"><REFLAVORO><R><ID>9</ID></R></REFLAVORO></F>
            <INFO ID="meta"><LOTTOLAVORAZIONE id="2"/></INFO>
            <INFO ID="more"><LOTTOLAVORAZIONE id="3"/></INFO>
        </LOTTOLAVORAZIONE>"#;
        let records = extractor().extract(xml, TOKEN).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].lot_id, "3");
    }

    #[test]
    fn test_short_path_is_malformed() {
        let xml = r#"<LOTTOLAVORAZIONE id="1"><F ID="A"><REFLAVORO><R>
            <ID>X</ID><FILE><NOME>x.pdf</NOME><PERCORSO>PDF\x.pdf</PERCORSO></FILE>
        </R></REFLAVORO></F></LOTTOLAVORAZIONE>"#;
        let err = extractor().extract(xml, TOKEN).unwrap_err();
        match err {
            ExtractionError::MalformedPath {
                label,
                document_id,
                path,
            } => {
                assert_eq!(label, "A");
                assert_eq!(document_id.as_deref(), Some("X"));
                assert_eq!(path, "PDF\\x.pdf");
            },
            other => panic!("expected malformed path, got {other:?}"),
        }
    }

    #[test]
    fn test_folder_without_id_is_rejected() {
        let xml = r#"<LOTTOLAVORAZIONE id="1"><F><REFLAVORO/></F></LOTTOLAVORAZIONE>"#;
        let err = extractor().extract(xml, TOKEN).unwrap_err();
        assert!(matches!(err, ExtractionError::MissingAttribute { .. }));
    }

    #[test]
    fn test_folder_without_references_yields_nothing() {
        let xml = r#"<LOTTOLAVORAZIONE id="1"><F ID="A"/></LOTTOLAVORAZIONE>"#;
        assert!(extractor().extract(xml, TOKEN).unwrap().is_empty());
    }

    #[test]
    fn test_malformed_xml() {
        let err = extractor()
            .extract("<LOTTOLAVORAZIONE id=\"1\"><F></G>", TOKEN)
            .unwrap_err();
        assert!(matches!(err, ExtractionError::Xml(_)));
    }

    #[test]
    fn test_extract_file_missing() {
        let err = extractor()
            .extract_file(Path::new("/nonexistent/indice.xml"), TOKEN)
            .unwrap_err();
        assert!(matches!(err, ExtractionError::Io { .. }));
    }
}
