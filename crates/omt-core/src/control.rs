//! Control-document surface.
//!
//! Channels steer each other with small literal XML documents carried in
//! metadata frames: subscriptions, tally, preview mode, quality hints,
//! sender identity and redirects. Recognized documents are absorbed by the
//! channel; anything else in a metadata frame is surfaced to the consumer.

use nom::bytes::complete::{tag, take_while, take_while1};
use nom::character::complete::{char, multispace0, multispace1};
use nom::multi::many0;
use nom::sequence::delimited;
use nom::IResult;

use crate::frame::{Quality, Tally};

/// A parsed control document.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlDocument {
    /// Peer requests video frames
    SubscribeVideo,
    /// Peer requests audio frames
    SubscribeAudio,
    /// Peer requests metadata frames
    SubscribeMetadata,
    /// Peer sets the tally state of this source
    Tally(Tally),
    /// Peer toggles preview-mode video
    PreviewVideo(bool),
    /// Peer advertises an encoder profile hint
    SuggestedQuality(Quality),
    /// Peer describes itself
    SenderInfo(SenderInfo),
    /// Peer redirects this connection to another address
    Redirect(String),
}

/// Structured fields of a `<SenderInfo/>` document.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SenderInfo {
    /// Human-readable source name
    pub name: String,
    /// Vendor string
    pub vendor: String,
    /// Software version
    pub version: String,
    /// Platform description
    pub platform: String,
}

fn xml_name(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-')(input)
}

fn attribute(input: &str) -> IResult<&str, (&str, &str)> {
    let (input, _) = multispace1(input)?;
    let (input, name) = xml_name(input)?;
    let (input, _) = multispace0(input)?;
    let (input, _) = char('=')(input)?;
    let (input, _) = multispace0(input)?;
    let (input, value) = delimited(char('"'), take_while(|c| c != '"'), char('"'))(input)?;
    Ok((input, (name, value)))
}

/// A single self-closing element: `<Name attr="value" .../>`.
fn element(input: &str) -> IResult<&str, (&str, Vec<(&str, &str)>)> {
    let (input, _) = multispace0(input)?;
    let (input, _) = char('<')(input)?;
    let (input, name) = xml_name(input)?;
    let (input, attrs) = many0(attribute)(input)?;
    let (input, _) = multispace0(input)?;
    let (input, _) = tag("/>")(input)?;
    let (input, _) = multispace0(input)?;
    Ok((input, (name, attrs)))
}

fn attr<'a>(attrs: &'a [(&str, &str)], name: &str) -> Option<&'a str> {
    attrs.iter().find(|(n, _)| *n == name).map(|(_, v)| *v)
}

fn unescape(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&amp;", "&")
}

fn escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

impl ControlDocument {
    /// Try to parse a metadata payload as a control document. Returns
    /// `None` for anything that should be surfaced to the consumer instead
    /// (typed streams, unknown documents, non-XML payloads).
    pub fn parse(payload: &[u8]) -> Option<ControlDocument> {
        let text = std::str::from_utf8(payload).ok()?;
        let (rest, (name, attrs)) = element(text).ok()?;
        if !rest.is_empty() {
            return None;
        }
        match name {
            "SubscribeVideo" => Some(ControlDocument::SubscribeVideo),
            "SubscribeAudio" => Some(ControlDocument::SubscribeAudio),
            "SubscribeMetadata" => Some(ControlDocument::SubscribeMetadata),
            "TallyPreviewProgram" => Some(ControlDocument::Tally(Tally::new(true, true))),
            "TallyProgram" => Some(ControlDocument::Tally(Tally::new(false, true))),
            "TallyPreview" => Some(ControlDocument::Tally(Tally::new(true, false))),
            "TallyNone" => Some(ControlDocument::Tally(Tally::NONE)),
            "PreviewVideoOn" => Some(ControlDocument::PreviewVideo(true)),
            "PreviewVideoOff" => Some(ControlDocument::PreviewVideo(false)),
            "SuggestedQuality" => {
                let quality = Quality::from_name(attr(&attrs, "Quality")?)?;
                Some(ControlDocument::SuggestedQuality(quality))
            }
            "SenderInfo" => Some(ControlDocument::SenderInfo(SenderInfo {
                name: unescape(attr(&attrs, "Name").unwrap_or_default()),
                vendor: unescape(attr(&attrs, "Vendor").unwrap_or_default()),
                version: unescape(attr(&attrs, "Version").unwrap_or_default()),
                platform: unescape(attr(&attrs, "Platform").unwrap_or_default()),
            })),
            "Redirect" => Some(ControlDocument::Redirect(unescape(attr(&attrs, "Address")?))),
            _ => None,
        }
    }

    /// Render the document as its literal wire form.
    pub fn to_xml(&self) -> String {
        match self {
            ControlDocument::SubscribeVideo => "<SubscribeVideo/>".into(),
            ControlDocument::SubscribeAudio => "<SubscribeAudio/>".into(),
            ControlDocument::SubscribeMetadata => "<SubscribeMetadata/>".into(),
            ControlDocument::Tally(tally) => match (tally.preview, tally.program) {
                (true, true) => "<TallyPreviewProgram/>".into(),
                (false, true) => "<TallyProgram/>".into(),
                (true, false) => "<TallyPreview/>".into(),
                (false, false) => "<TallyNone/>".into(),
            },
            ControlDocument::PreviewVideo(true) => "<PreviewVideoOn/>".into(),
            ControlDocument::PreviewVideo(false) => "<PreviewVideoOff/>".into(),
            ControlDocument::SuggestedQuality(quality) => {
                format!("<SuggestedQuality Quality=\"{}\"/>", quality.as_name())
            }
            ControlDocument::SenderInfo(info) => format!(
                "<SenderInfo Name=\"{}\" Vendor=\"{}\" Version=\"{}\" Platform=\"{}\"/>",
                escape(&info.name),
                escape(&info.vendor),
                escape(&info.version),
                escape(&info.platform),
            ),
            ControlDocument::Redirect(address) => {
                format!("<Redirect Address=\"{}\"/>", escape(address))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_documents() {
        assert_eq!(
            ControlDocument::parse(b"<SubscribeVideo/>"),
            Some(ControlDocument::SubscribeVideo)
        );
        assert_eq!(
            ControlDocument::parse(b"<SubscribeAudio/>"),
            Some(ControlDocument::SubscribeAudio)
        );
        assert_eq!(
            ControlDocument::parse(b"<SubscribeMetadata/>"),
            Some(ControlDocument::SubscribeMetadata)
        );
        assert_eq!(
            ControlDocument::parse(b"<PreviewVideoOn/>"),
            Some(ControlDocument::PreviewVideo(true))
        );
        assert_eq!(
            ControlDocument::parse(b"<PreviewVideoOff/>"),
            Some(ControlDocument::PreviewVideo(false))
        );
    }

    #[test]
    fn test_tally_documents() {
        assert_eq!(
            ControlDocument::parse(b"<TallyPreviewProgram/>"),
            Some(ControlDocument::Tally(Tally::new(true, true)))
        );
        assert_eq!(
            ControlDocument::parse(b"<TallyProgram/>"),
            Some(ControlDocument::Tally(Tally::new(false, true)))
        );
        assert_eq!(
            ControlDocument::parse(b"<TallyPreview/>"),
            Some(ControlDocument::Tally(Tally::new(true, false)))
        );
        assert_eq!(
            ControlDocument::parse(b"<TallyNone/>"),
            Some(ControlDocument::Tally(Tally::NONE))
        );
    }

    #[test]
    fn test_suggested_quality() {
        assert_eq!(
            ControlDocument::parse(br#"<SuggestedQuality Quality="Low"/>"#),
            Some(ControlDocument::SuggestedQuality(Quality::Low))
        );
        // Unknown level is not a control document
        assert_eq!(
            ControlDocument::parse(br#"<SuggestedQuality Quality="Turbo"/>"#),
            None
        );
        // Missing attribute is not a control document
        assert_eq!(ControlDocument::parse(b"<SuggestedQuality/>"), None);
    }

    #[test]
    fn test_sender_info() {
        let doc = ControlDocument::parse(
            br#"<SenderInfo Name="Studio Cam 1" Vendor="Acme" Version="1.2" Platform="linux"/>"#,
        );
        match doc {
            Some(ControlDocument::SenderInfo(info)) => {
                assert_eq!(info.name, "Studio Cam 1");
                assert_eq!(info.vendor, "Acme");
                assert_eq!(info.version, "1.2");
                assert_eq!(info.platform, "linux");
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn test_redirect() {
        assert_eq!(
            ControlDocument::parse(br#"<Redirect Address="10.0.0.5:6401"/>"#),
            Some(ControlDocument::Redirect("10.0.0.5:6401".into()))
        );
    }

    #[test]
    fn test_round_trip_via_to_xml() {
        let docs = [
            ControlDocument::SubscribeVideo,
            ControlDocument::Tally(Tally::new(true, false)),
            ControlDocument::PreviewVideo(false),
            ControlDocument::SuggestedQuality(Quality::High),
            ControlDocument::SenderInfo(SenderInfo {
                name: "A \"quoted\" name".into(),
                vendor: "V&V".into(),
                version: "0.1".into(),
                platform: String::new(),
            }),
            ControlDocument::Redirect("host:6400".into()),
        ];
        for doc in docs {
            let xml = doc.to_xml();
            assert_eq!(ControlDocument::parse(xml.as_bytes()), Some(doc), "{xml}");
        }
    }

    #[test]
    fn test_non_control_payloads_pass_through() {
        assert_eq!(ControlDocument::parse(b"<Unknown/>"), None);
        assert_eq!(ControlDocument::parse(b"<note>text body</note>"), None);
        assert_eq!(ControlDocument::parse(&[0xFD, 0x06, 0x00]), None);
        assert_eq!(ControlDocument::parse(&[0xFF, 0xFE]), None);
        assert_eq!(ControlDocument::parse(b""), None);
    }

    #[test]
    fn test_whitespace_tolerated() {
        assert_eq!(
            ControlDocument::parse(b"  <SubscribeVideo/>\n"),
            Some(ControlDocument::SubscribeVideo)
        );
        assert_eq!(
            ControlDocument::parse(b"<SuggestedQuality   Quality = \"Medium\" />"),
            Some(ControlDocument::SuggestedQuality(Quality::Medium))
        );
    }
}
