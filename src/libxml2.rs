//! LibXML2 FFI Wrapper Module
//!
//! This module provides a safe wrapper around the libxml2 calls needed to parse
//! metadata records (XML) and directory listings (HTML) from memory and to
//! evaluate XPath expressions against them.
//!
//! ## Thread Safety Strategy
//!
//! - **Initialization**: `xmlInitParser` is guarded by `std::sync::Once`.
//! - **Parsing**: every parse builds its own parser context inside libxml2, so
//!   different documents may be parsed from different threads.
//! - **XPath**: each evaluation creates and frees its own XPath context. A
//!   per-document lock serializes evaluations against the same tree.
//! - **Errors**: the structured error handler is thread-local in libxml2, so
//!   it is installed around each call and removed afterwards.

use std::ffi::{CStr, CString};
use std::marker::PhantomData;
use std::ptr;
use std::sync::{Arc, Mutex, Once};

use libc::{c_char, c_int, c_uchar, c_void};

use crate::error::{LibXml2Error, LibXml2Result};
use crate::namespaces::Namespaces;

/// Global initialization flag for libxml2
static LIBXML2_INIT: Once = Once::new();

/// Largest document handed to libxml2 (its length argument is a C int)
const MAX_DOCUMENT_SIZE: usize = c_int::MAX as usize;

const XML_PARSE_NOWARNING: c_int = 1 << 6;
const XML_PARSE_NONET: c_int = 1 << 11;

const HTML_PARSE_RECOVER: c_int = 1 << 0;
const HTML_PARSE_NOERROR: c_int = 1 << 5;
const HTML_PARSE_NOWARNING: c_int = 1 << 6;
const HTML_PARSE_NONET: c_int = 1 << 11;

const XPATH_NODESET: c_int = 1;
const XPATH_BOOLEAN: c_int = 2;
const XPATH_NUMBER: c_int = 3;
const XPATH_STRING: c_int = 4;

// Opaque libxml2 structures
#[repr(C)]
pub struct XmlDoc {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlNode {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlXPathContext {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlNodeSet {
    pub node_nr: c_int,
    pub node_max: c_int,
    pub node_tab: *mut *mut XmlNode,
}

#[repr(C)]
pub struct XmlXPathObject {
    pub kind: c_int,
    pub nodesetval: *mut XmlNodeSet,
    pub boolval: c_int,
    pub floatval: f64,
    pub stringval: *mut c_uchar,
    pub user: *mut c_void,
    pub index: c_int,
    pub user2: *mut c_void,
    pub index2: c_int,
}

type ReadMemoryFn = unsafe extern "C" fn(
    buffer: *const c_char,
    size: c_int,
    url: *const c_char,
    encoding: *const c_char,
    options: c_int,
) -> *mut XmlDoc;

pub type XmlFreeFunc = Option<unsafe extern "C" fn(mem: *mut c_void)>;

// External libxml2 FFI declarations
#[cfg_attr(target_os = "windows", link(name = "libxml2"))]
#[cfg_attr(not(target_os = "windows"), link(name = "xml2"))]
unsafe extern "C" {
    pub fn xmlInitParser();

    // Document parsing
    pub fn xmlReadMemory(
        buffer: *const c_char,
        size: c_int,
        url: *const c_char,
        encoding: *const c_char,
        options: c_int,
    ) -> *mut XmlDoc;
    pub fn htmlReadMemory(
        buffer: *const c_char,
        size: c_int,
        url: *const c_char,
        encoding: *const c_char,
        options: c_int,
    ) -> *mut XmlDoc;
    pub fn xmlFreeDoc(doc: *mut XmlDoc);

    // XPath
    pub fn xmlXPathNewContext(doc: *mut XmlDoc) -> *mut XmlXPathContext;
    pub fn xmlXPathFreeContext(ctxt: *mut XmlXPathContext);
    pub fn xmlXPathRegisterNs(
        ctxt: *mut XmlXPathContext,
        prefix: *const c_uchar,
        ns_uri: *const c_uchar,
    ) -> c_int;
    pub fn xmlXPathEval(expr: *const c_uchar, ctxt: *mut XmlXPathContext) -> *mut XmlXPathObject;
    pub fn xmlXPathFreeObject(obj: *mut XmlXPathObject);

    pub fn xmlNodeGetContent(node: *const XmlNode) -> *mut c_uchar;

    pub fn xmlSetStructuredErrorFunc(ctx: *mut c_void, handler: XmlStructuredErrorFunc);

    pub static xmlFree: XmlFreeFunc;
}

#[repr(C)]
pub struct xmlError {
    pub domain: c_int,
    pub code: c_int,
    pub message: *const c_char,
    pub level: c_int,
    pub file: *const c_char,
    pub line: c_int,
    pub str1: *const c_char,
    pub str2: *const c_char,
    pub str3: *const c_char,
    pub int1: c_int,
    pub int2: c_int,
    pub ctxt: *mut c_void,
    pub node: *mut c_void,
}

pub type XmlStructuredErrorFunc =
    Option<unsafe extern "C" fn(user_data: *mut c_void, error: *mut xmlError)>;

/// Callback for libxml2 to report parse and XPath errors (structured)
unsafe extern "C" fn structured_error_callback(user_data: *mut c_void, error: *mut xmlError) {
    if user_data.is_null() || error.is_null() {
        return;
    }
    let errors = unsafe { &mut *(user_data as *mut Vec<String>) };

    let msg_ptr = unsafe { (*error).message };
    if !msg_ptr.is_null() {
        let c_str = unsafe { CStr::from_ptr(msg_ptr) };
        let line = unsafe { (*error).line };
        let text = c_str.to_string_lossy();
        let text = text.trim();
        if line > 0 {
            errors.push(format!("line {}: {}", line, text));
        } else {
            errors.push(text.to_string());
        }
    }
}

/// Installs the structured error handler for the current thread and removes
/// it again on drop. The message buffer is boxed so its address stays fixed.
struct ErrorCapture {
    messages: Box<Vec<String>>,
}

impl ErrorCapture {
    fn install() -> Self {
        let mut messages = Box::new(Vec::new());
        let user_data = &mut *messages as *mut Vec<String> as *mut c_void;
        unsafe {
            xmlSetStructuredErrorFunc(user_data, Some(structured_error_callback));
        }
        ErrorCapture { messages }
    }

    fn take(&mut self) -> Vec<String> {
        std::mem::take(&mut *self.messages)
    }
}

impl Drop for ErrorCapture {
    fn drop(&mut self) {
        unsafe {
            xmlSetStructuredErrorFunc(ptr::null_mut(), None);
        }
    }
}

/// A parsed XML or HTML document owned by libxml2.
///
/// Evaluations against one document are serialized by an internal lock, so a
/// document can be shared between tasks behind an `Arc`.
pub struct XmlDocument {
    ptr: *mut XmlDoc,
    namespaces: Arc<Namespaces>,
    eval_lock: Mutex<()>,
    _phantom: PhantomData<XmlDoc>,
}

// Safety: the tree is only read after parsing, and every read goes through
// `eval_lock`.
unsafe impl Send for XmlDocument {}
unsafe impl Sync for XmlDocument {}

impl std::fmt::Debug for XmlDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XmlDocument")
            .field("namespaces", &self.namespaces.len())
            .finish()
    }
}

impl XmlDocument {
    /// Evaluate `expression` and return the text content of every matched
    /// node, in document order.
    ///
    /// Non-node results (strings, numbers, booleans) produce a single value
    /// when they are truthy in the XPath sense and nothing otherwise.
    pub fn select(&self, expression: &str) -> LibXml2Result<Vec<String>> {
        self.evaluate(expression, |obj| unsafe { object_values(obj) })
    }

    /// Number of nodes (or truthy scalar results) matched by `expression`
    pub fn count(&self, expression: &str) -> LibXml2Result<usize> {
        self.evaluate(expression, |obj| unsafe { object_count(obj) })
    }

    pub fn namespaces(&self) -> &Namespaces {
        &self.namespaces
    }

    fn evaluate<T>(
        &self,
        expression: &str,
        extract: impl FnOnce(&XmlXPathObject) -> T,
    ) -> LibXml2Result<T> {
        let invalid = || LibXml2Error::InvalidXPath {
            expression: expression.to_string(),
        };
        let c_expr = CString::new(expression).map_err(|_| invalid())?;

        // A poisoned lock only means another evaluation panicked; the tree is untouched.
        let _guard = self
            .eval_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        unsafe {
            let ctxt = xmlXPathNewContext(self.ptr);
            if ctxt.is_null() {
                return Err(LibXml2Error::XPathContextCreationFailed);
            }

            for (prefix, uri) in self.namespaces.iter() {
                let (Ok(prefix), Ok(uri)) = (CString::new(prefix), CString::new(uri)) else {
                    continue;
                };
                xmlXPathRegisterNs(
                    ctxt,
                    prefix.as_ptr() as *const c_uchar,
                    uri.as_ptr() as *const c_uchar,
                );
            }

            let obj = {
                let _capture = ErrorCapture::install();
                xmlXPathEval(c_expr.as_ptr() as *const c_uchar, ctxt)
            };

            let result = if obj.is_null() {
                Err(invalid())
            } else {
                let value = extract(&*obj);
                xmlXPathFreeObject(obj);
                Ok(value)
            };

            xmlXPathFreeContext(ctxt);
            result
        }
    }
}

impl Drop for XmlDocument {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe {
                xmlFreeDoc(self.ptr);
            }
            self.ptr = ptr::null_mut();
        }
    }
}

unsafe fn node_slice(obj: &XmlXPathObject) -> &[*mut XmlNode] {
    if obj.nodesetval.is_null() {
        return &[];
    }
    let set = unsafe { &*obj.nodesetval };
    if set.node_tab.is_null() || set.node_nr <= 0 {
        return &[];
    }
    unsafe { std::slice::from_raw_parts(set.node_tab, set.node_nr as usize) }
}

unsafe fn xml_string(value: *const c_uchar) -> String {
    if value.is_null() {
        return String::new();
    }
    unsafe { CStr::from_ptr(value as *const c_char) }
        .to_string_lossy()
        .into_owned()
}

unsafe fn node_content(node: *mut XmlNode) -> String {
    if node.is_null() {
        return String::new();
    }
    unsafe {
        let content = xmlNodeGetContent(node);
        let text = xml_string(content);
        if !content.is_null()
            && let Some(free) = xmlFree
        {
            free(content as *mut c_void);
        }
        text
    }
}

fn number_is_truthy(value: f64) -> bool {
    value != 0.0 && !value.is_nan()
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

unsafe fn object_values(obj: &XmlXPathObject) -> Vec<String> {
    match obj.kind {
        XPATH_NODESET => unsafe { node_slice(obj) }
            .iter()
            .map(|&node| unsafe { node_content(node) })
            .collect(),
        XPATH_STRING => {
            let value = unsafe { xml_string(obj.stringval) };
            if value.is_empty() { vec![] } else { vec![value] }
        }
        XPATH_BOOLEAN if obj.boolval != 0 => vec!["true".to_string()],
        XPATH_NUMBER if number_is_truthy(obj.floatval) => vec![format_number(obj.floatval)],
        _ => vec![],
    }
}

unsafe fn object_count(obj: &XmlXPathObject) -> usize {
    match obj.kind {
        XPATH_NODESET => unsafe { node_slice(obj) }.len(),
        XPATH_STRING => usize::from(!obj.stringval.is_null() && unsafe { *obj.stringval } != 0),
        XPATH_BOOLEAN => usize::from(obj.boolval != 0),
        XPATH_NUMBER => usize::from(number_is_truthy(obj.floatval)),
        _ => 0,
    }
}

/// LibXML2 wrapper providing safe parsing entry points.
///
/// Documents produced by one wrapper share its namespace table.
#[derive(Debug, Clone)]
pub struct LibXml2Wrapper {
    namespaces: Arc<Namespaces>,
}

impl LibXml2Wrapper {
    /// Create a wrapper with the built-in namespace prefixes.
    ///
    /// This initializes the libxml2 parser if not already initialized.
    pub fn new() -> Self {
        Self::with_namespaces(Namespaces::default())
    }

    pub fn with_namespaces(namespaces: Namespaces) -> Self {
        LIBXML2_INIT.call_once(|| unsafe {
            xmlInitParser();
        });

        LibXml2Wrapper {
            namespaces: Arc::new(namespaces),
        }
    }

    pub fn namespaces(&self) -> &Namespaces {
        &self.namespaces
    }

    /// Parse a well-formed XML document from memory.
    ///
    /// # Errors
    ///
    /// Returns `LibXml2Error::DocumentParseFailed` with the messages libxml2
    /// reported when the bytes are not well-formed XML.
    pub fn parse_xml(&self, data: &[u8], location: &str) -> LibXml2Result<XmlDocument> {
        self.parse_with(
            xmlReadMemory,
            data,
            location,
            XML_PARSE_NONET | XML_PARSE_NOWARNING,
        )
    }

    /// Parse an HTML page from memory, recovering from markup errors.
    pub fn parse_html(&self, data: &[u8], location: &str) -> LibXml2Result<XmlDocument> {
        self.parse_with(
            htmlReadMemory,
            data,
            location,
            HTML_PARSE_RECOVER | HTML_PARSE_NOERROR | HTML_PARSE_NOWARNING | HTML_PARSE_NONET,
        )
    }

    fn parse_with(
        &self,
        reader: ReadMemoryFn,
        data: &[u8],
        location: &str,
        options: c_int,
    ) -> LibXml2Result<XmlDocument> {
        if data.is_empty() {
            return Err(LibXml2Error::DocumentParseFailed {
                details: "document is empty".to_string(),
            });
        }
        if data.len() > MAX_DOCUMENT_SIZE {
            return Err(LibXml2Error::DocumentTooLarge { size: data.len() });
        }

        // The base URL only feeds libxml2's diagnostics; skip it when it cannot be a C string.
        let base = CString::new(location).ok();
        let base_ptr = base.as_ref().map_or(ptr::null(), |b| b.as_ptr());

        let (doc, messages) = unsafe {
            let mut capture = ErrorCapture::install();
            let doc = reader(
                data.as_ptr() as *const c_char,
                data.len() as c_int,
                base_ptr,
                ptr::null(),
                options,
            );
            (doc, capture.take())
        };

        if doc.is_null() {
            let details = if messages.is_empty() {
                "libxml2 could not build a document tree".to_string()
            } else {
                messages.join("; ")
            };
            return Err(LibXml2Error::DocumentParseFailed { details });
        }

        Ok(XmlDocument {
            ptr: doc,
            namespaces: Arc::clone(&self.namespaces),
            eval_lock: Mutex::new(()),
            _phantom: PhantomData,
        })
    }
}

impl Default for LibXml2Wrapper {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECORD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<gmd:MD_Metadata xmlns:gmd="http://www.isotc211.org/2005/gmd"
                 xmlns:gco="http://www.isotc211.org/2005/gco">
  <gmd:fileIdentifier><gco:CharacterString> abc-123 </gco:CharacterString></gmd:fileIdentifier>
  <gmd:contact><gco:CharacterString>first</gco:CharacterString></gmd:contact>
  <gmd:contact><gco:CharacterString>second</gco:CharacterString></gmd:contact>
</gmd:MD_Metadata>"#;

    fn parse(xml: &str) -> XmlDocument {
        LibXml2Wrapper::new()
            .parse_xml(xml.as_bytes(), "memory.xml")
            .unwrap()
    }

    #[test]
    fn test_select_node_text() {
        let doc = parse(RECORD);
        let values = doc
            .select("/gmd:MD_Metadata/gmd:fileIdentifier/gco:CharacterString")
            .unwrap();
        assert_eq!(values, vec![" abc-123 ".to_string()]);
    }

    #[test]
    fn test_select_multiple_nodes_in_document_order() {
        let doc = parse(RECORD);
        let values = doc.select("//gmd:contact/gco:CharacterString").unwrap();
        assert_eq!(values, vec!["first".to_string(), "second".to_string()]);
        assert_eq!(doc.count("//gmd:contact").unwrap(), 2);
    }

    #[test]
    fn test_select_missing_node() {
        let doc = parse(RECORD);
        assert!(doc.select("//gmd:abstract").unwrap().is_empty());
        assert_eq!(doc.count("//gmd:abstract").unwrap(), 0);
    }

    #[test]
    fn test_scalar_results() {
        let doc = parse(RECORD);
        assert_eq!(doc.select("count(//gmd:contact)").unwrap(), vec!["2"]);
        assert!(doc.select("count(//gmd:abstract)").unwrap().is_empty());
        assert_eq!(doc.count("boolean(//gmd:contact)").unwrap(), 1);
        assert_eq!(doc.count("boolean(//gmd:abstract)").unwrap(), 0);
    }

    #[test]
    fn test_invalid_xpath() {
        let doc = parse(RECORD);
        let err = doc.select("//gmd:contact[").unwrap_err();
        assert_eq!(
            err,
            LibXml2Error::InvalidXPath {
                expression: "//gmd:contact[".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_prefix_is_invalid() {
        let doc = parse(RECORD);
        assert!(matches!(
            doc.select("//nope:thing"),
            Err(LibXml2Error::InvalidXPath { .. })
        ));
    }

    #[test]
    fn test_malformed_xml_reports_details() {
        let wrapper = LibXml2Wrapper::new();
        let result = wrapper.parse_xml(b"<root><unclosed></root>", "broken.xml");
        match result {
            Err(LibXml2Error::DocumentParseFailed { details }) => assert!(!details.is_empty()),
            other => panic!("Expected DocumentParseFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_document() {
        let wrapper = LibXml2Wrapper::new();
        assert!(matches!(
            wrapper.parse_xml(b"", "empty.xml"),
            Err(LibXml2Error::DocumentParseFailed { .. })
        ));
    }

    #[test]
    fn test_html_recovers_from_sloppy_markup() {
        let wrapper = LibXml2Wrapper::new();
        let html = b"<html><body><a href='a.xml'>a<a href=\"b.xml\">b</body>";
        let doc = wrapper.parse_html(html, "http://example.com/waf/").unwrap();
        assert_eq!(doc.select("//a/@href").unwrap(), vec!["a.xml", "b.xml"]);
    }

    #[test]
    fn test_custom_namespace_prefix() {
        let mut namespaces = Namespaces::empty();
        namespaces.insert("m", "http://www.isotc211.org/2005/gmd");
        let wrapper = LibXml2Wrapper::with_namespaces(namespaces);
        let doc = wrapper.parse_xml(RECORD.as_bytes(), "memory.xml").unwrap();
        assert_eq!(doc.count("//m:contact").unwrap(), 2);
    }

    #[test]
    fn test_concurrent_parse_and_select() {
        use rayon::prelude::*;

        let wrapper = LibXml2Wrapper::new();
        let counts: Vec<_> = (0..16)
            .into_par_iter()
            .map(|_| {
                let doc = wrapper.parse_xml(RECORD.as_bytes(), "memory.xml").unwrap();
                doc.count("//gmd:contact").unwrap()
            })
            .collect();
        assert!(counts.iter().all(|&c| c == 2));
    }

    #[test]
    fn test_shared_document_across_threads() {
        let doc = Arc::new(parse(RECORD));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let doc = Arc::clone(&doc);
                std::thread::spawn(move || doc.count("//gmd:contact").unwrap())
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 2);
        }
    }
}
