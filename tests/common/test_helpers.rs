use std::sync::Arc;

use validate_metadata::{CatalogFile, RuleCatalog};

pub const WAF_SEED: &str = "http://data.test/waf/";
pub const CSW_SEED: &str = "http://data.test/csw";
pub const LIVE_LINK: &str = "http://data.test/download/map.zip";
pub const DEAD_LINK: &str = "http://data.test/download/gone.zip";

/// Rule catalog shared by the integration tests
pub const CATALOG_TOML: &str = r#"
[[rules]]
id = "title"
name = "Title"
type = "Exists"
xpaths = ["//gmd:title/gco:CharacterString"]

[[rules]]
id = "topic"
name = "Topic Category"
type = "ValueInListRule"
xpaths = ["//gmd:topicCategory/gmd:MD_TopicCategoryCode"]
values = "topics"

[[rules]]
id = "has-online"
name = "Has Online Resource"
type = "Exists"
xpaths = ["//gmd:onLine"]

[[rules]]
id = "online-url"
name = "Online Resource URL"
type = "ValidUrl"
xpaths = ["//gmd:onLine//gmd:URL"]

[[rules]]
id = "online-if-present"
name = "Online Resource Resolves"
type = "Conditional"
condition_rule = "has-online"
requirement_rule = "online-url"

[[value_sets]]
id = "topics"
name = "ISO Topic Categories"
values = ["geoscientificInformation", "environment", "inlandWaters"]

[[rulesets]]
id = "iso"
name = "ISO 19139 minimum"
rules = ["title", "topic", "online-if-present"]

[[rulesets]]
id = "empty"
name = "Nothing required"
rules = []

[[validation_sets]]
id = "waf"
name = "State survey WAF"
url = "http://data.test/waf/"
ruleset = "iso"

[[validation_sets]]
id = "csw"
name = "State survey CSW"
url = "http://data.test/csw"
ruleset = "iso"
"#;

pub fn catalog_file() -> CatalogFile {
    toml::from_str(CATALOG_TOML).expect("test catalog parses")
}

pub fn catalog() -> Arc<RuleCatalog> {
    Arc::new(RuleCatalog::from_file(catalog_file()).expect("test catalog is consistent"))
}

/// ISO 19139 record; `None` leaves the element out
pub fn iso_record(title: Option<&str>, topic: &str, link: Option<&str>) -> String {
    let title = title
        .map(|t| {
            format!(
                "<gmd:title><gco:CharacterString>{}</gco:CharacterString></gmd:title>",
                t
            )
        })
        .unwrap_or_default();
    let online = link
        .map(|url| {
            format!(
                "<gmd:distributionInfo><gmd:onLine><gmd:CI_OnlineResource><gmd:linkage>\
                 <gmd:URL>{}</gmd:URL></gmd:linkage></gmd:CI_OnlineResource></gmd:onLine>\
                 </gmd:distributionInfo>",
                url
            )
        })
        .unwrap_or_default();

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<gmd:MD_Metadata xmlns:gmd="http://www.isotc211.org/2005/gmd"
                 xmlns:gco="http://www.isotc211.org/2005/gco">
  <gmd:identificationInfo>
    <gmd:MD_DataIdentification>
      <gmd:citation><gmd:CI_Citation>{}</gmd:CI_Citation></gmd:citation>
      <gmd:topicCategory><gmd:MD_TopicCategoryCode>{}</gmd:MD_TopicCategoryCode></gmd:topicCategory>
    </gmd:MD_DataIdentification>
  </gmd:identificationInfo>
  {}
</gmd:MD_Metadata>"#,
        title, topic, online
    )
}

/// A record every rule in the "iso" rule set accepts
pub fn good_record() -> String {
    iso_record(Some("Bedrock geology"), "geoscientificInformation", Some(LIVE_LINK))
}

/// Apache-style directory listing linking to `files`
pub fn waf_listing(files: &[&str]) -> String {
    let links: String = files
        .iter()
        .map(|f| format!("<tr><td><a href=\"{}\">{}</a></td></tr>\n", f, f))
        .collect();
    format!(
        "<html><head><title>Index of /waf</title></head><body><table>\n\
         <tr><td><a href=\"../\">Parent Directory</a></td></tr>\n{}</table></body></html>",
        links
    )
}

/// CSW 2.0.2 GetRecords response listing brief records with `ids`
pub fn csw_response(ids: &[&str]) -> String {
    let records: String = ids
        .iter()
        .map(|id| {
            format!(
                "<csw:BriefRecord><dc:identifier>{}</dc:identifier>\
                 <dc:title>Record {}</dc:title></csw:BriefRecord>\n",
                id, id
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<csw:GetRecordsResponse xmlns:csw="http://www.opengis.net/cat/csw/2.0.2"
                        xmlns:dc="http://purl.org/dc/elements/1.1/">
  <csw:SearchStatus timestamp="2024-01-01T00:00:00"/>
  <csw:SearchResults numberOfRecordsMatched="{}" numberOfRecordsReturned="{}">
{}  </csw:SearchResults>
</csw:GetRecordsResponse>"#,
        ids.len(),
        ids.len(),
        records
    )
}
