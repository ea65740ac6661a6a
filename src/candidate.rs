//! Method signatures and the selectors derived from them.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use sha1::{Digest, Sha1};

use crate::call::Selector;
use crate::error::RmgError;
use crate::util::put_utf;

/// Version word that prefixes rmic's interface hash input.
const INTERFACE_HASH_STUB_VERSION: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
}

impl Primitive {
    fn from_java(name: &str) -> Option<Self> {
        Some(match name {
            "boolean" => Primitive::Boolean,
            "byte" => Primitive::Byte,
            "char" => Primitive::Char,
            "short" => Primitive::Short,
            "int" => Primitive::Int,
            "long" => Primitive::Long,
            "float" => Primitive::Float,
            "double" => Primitive::Double,
            _ => return None,
        })
    }

    pub fn descriptor(self) -> char {
        match self {
            Primitive::Boolean => 'Z',
            Primitive::Byte => 'B',
            Primitive::Char => 'C',
            Primitive::Short => 'S',
            Primitive::Int => 'I',
            Primitive::Long => 'J',
            Primitive::Float => 'F',
            Primitive::Double => 'D',
        }
    }

    pub fn java_name(self) -> &'static str {
        match self {
            Primitive::Boolean => "boolean",
            Primitive::Byte => "byte",
            Primitive::Char => "char",
            Primitive::Short => "short",
            Primitive::Int => "int",
            Primitive::Long => "long",
            Primitive::Float => "float",
            Primitive::Double => "double",
        }
    }
}

/// A Java type as it appears in a method descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeDesc {
    Void,
    Primitive(Primitive),
    /// Binary class name, e.g. `java.lang.String`.
    Object(String),
    Array(Box<TypeDesc>),
}

/// Unqualified names that resolve without an import in typical wordlists.
const KNOWN_TYPES: &[(&str, &str)] = &[
    ("Object", "java.lang.Object"),
    ("String", "java.lang.String"),
    ("Boolean", "java.lang.Boolean"),
    ("Byte", "java.lang.Byte"),
    ("Character", "java.lang.Character"),
    ("Short", "java.lang.Short"),
    ("Integer", "java.lang.Integer"),
    ("Long", "java.lang.Long"),
    ("Float", "java.lang.Float"),
    ("Double", "java.lang.Double"),
    ("Number", "java.lang.Number"),
    ("Class", "java.lang.Class"),
    ("StringBuilder", "java.lang.StringBuilder"),
    ("Exception", "java.lang.Exception"),
    ("List", "java.util.List"),
    ("ArrayList", "java.util.ArrayList"),
    ("Map", "java.util.Map"),
    ("HashMap", "java.util.HashMap"),
    ("Set", "java.util.Set"),
    ("HashSet", "java.util.HashSet"),
    ("Collection", "java.util.Collection"),
    ("Properties", "java.util.Properties"),
    ("Date", "java.util.Date"),
    ("File", "java.io.File"),
    ("Remote", "java.rmi.Remote"),
    ("MarshalledObject", "java.rmi.MarshalledObject"),
    ("ObjID", "java.rmi.server.ObjID"),
    ("UID", "java.rmi.server.UID"),
    ("VMID", "java.rmi.dgc.VMID"),
    ("Lease", "java.rmi.dgc.Lease"),
    ("ActivationID", "java.rmi.activation.ActivationID"),
    ("ActivationDesc", "java.rmi.activation.ActivationDesc"),
    ("ActivationGroupID", "java.rmi.activation.ActivationGroupID"),
    ("ActivationGroupDesc", "java.rmi.activation.ActivationGroupDesc"),
    ("ActivationInstantiator", "java.rmi.activation.ActivationInstantiator"),
    ("ActivationMonitor", "java.rmi.activation.ActivationMonitor"),
    ("ActivationSystem", "java.rmi.activation.ActivationSystem"),
    ("Subject", "javax.security.auth.Subject"),
    ("ObjectName", "javax.management.ObjectName"),
    ("QueryExp", "javax.management.QueryExp"),
    ("Attribute", "javax.management.Attribute"),
    ("AttributeList", "javax.management.AttributeList"),
    ("NotificationFilter", "javax.management.NotificationFilter"),
    ("RMIConnection", "javax.management.remote.rmi.RMIConnection"),
];

impl TypeDesc {
    pub fn object(class_name: &str) -> Self {
        TypeDesc::Object(class_name.to_owned())
    }

    /// Parses a type written the way Java source writes it: `int`,
    /// `String[]`, `java.util.Map<String, Object>`, `Object...`.
    pub fn from_java(source: &str) -> Result<Self, RmgError> {
        let mut name: String = strip_generics(source)
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        let mut dimensions = 0;
        if let Some(stripped) = name.strip_suffix("...") {
            name = stripped.to_owned();
            dimensions += 1;
        }
        while let Some(stripped) = name.strip_suffix("[]") {
            name = stripped.to_owned();
            dimensions += 1;
        }
        if name.is_empty() || !name.split('.').all(is_identifier) {
            return Err(RmgError::invalid_input(format!("invalid type '{}'", source.trim())));
        }

        let mut desc = if name == "void" {
            if dimensions > 0 {
                return Err(RmgError::invalid_input("void cannot be an array"));
            }
            TypeDesc::Void
        } else if let Some(primitive) = Primitive::from_java(&name) {
            TypeDesc::Primitive(primitive)
        } else {
            let qualified = KNOWN_TYPES
                .iter()
                .find(|(short, _)| *short == name)
                .map(|(_, full)| (*full).to_owned())
                .unwrap_or(name);
            TypeDesc::Object(qualified)
        };
        for _ in 0..dimensions {
            desc = TypeDesc::Array(Box::new(desc));
        }
        Ok(desc)
    }

    pub fn descriptor(&self) -> String {
        match self {
            TypeDesc::Void => "V".to_owned(),
            TypeDesc::Primitive(primitive) => primitive.descriptor().to_string(),
            TypeDesc::Object(name) => format!("L{};", name.replace('.', "/")),
            TypeDesc::Array(element) => format!("[{}", element.descriptor()),
        }
    }

    /// Class name as `Class.getName()` reports it; arrays use descriptor form.
    pub fn class_name(&self) -> String {
        match self {
            TypeDesc::Array(_) => self.descriptor().replace('/', "."),
            TypeDesc::Object(name) => name.clone(),
            TypeDesc::Primitive(primitive) => primitive.java_name().to_owned(),
            TypeDesc::Void => "void".to_owned(),
        }
    }

    pub fn is_primitive(&self) -> bool {
        matches!(self, TypeDesc::Primitive(_))
    }
}

impl fmt::Display for TypeDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDesc::Void => write!(f, "void"),
            TypeDesc::Primitive(primitive) => write!(f, "{}", primitive.java_name()),
            TypeDesc::Object(name) => write!(f, "{}", name),
            TypeDesc::Array(element) => write!(f, "{}[]", element),
        }
    }
}

fn is_identifier(part: &str) -> bool {
    let mut chars = part.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

fn strip_generics(source: &str) -> String {
    let mut depth = 0usize;
    source
        .chars()
        .filter(|&c| match c {
            '<' => {
                depth += 1;
                false
            }
            '>' => {
                depth = depth.saturating_sub(1);
                false
            }
            _ => depth == 0,
        })
        .collect()
}

/// Splits at `separator` outside of generic brackets.
fn split_top_level(source: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in source.char_indices() {
        match c {
            '<' => depth += 1,
            '>' => depth = depth.saturating_sub(1),
            c if c == separator && depth == 0 => {
                parts.push(&source[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&source[start..]);
    parts
}

/// The modern RMI method hash: the first eight bytes of the SHA-1 of the
/// `writeUTF` encoding of name and descriptor, read little-endian.
pub fn method_hash(name_and_descriptor: &str) -> i64 {
    let mut input = Vec::with_capacity(name_and_descriptor.len() + 2);
    put_utf(&mut input, name_and_descriptor);
    digest_to_hash(&Sha1::digest(&input))
}

fn digest_to_hash(digest: &[u8]) -> i64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_le_bytes(bytes)
}

/// A remote method signature together with its method hash.
///
/// Candidates compare equal when their hashes do, which is also what the
/// server compares.
#[derive(Debug, Clone)]
pub struct MethodCandidate {
    name: String,
    params: Vec<TypeDesc>,
    return_type: TypeDesc,
    hash: i64,
}

impl MethodCandidate {
    pub fn new(name: &str, params: Vec<TypeDesc>, return_type: TypeDesc) -> Self {
        let mut candidate = Self {
            name: name.to_owned(),
            params,
            return_type,
            hash: 0,
        };
        candidate.hash = method_hash(&candidate.name_and_descriptor());
        candidate
    }

    /// Parses a Java method declaration such as
    /// `String execute(String cmd) throws RemoteException`.
    pub fn parse(signature: &str) -> Result<Self, RmgError> {
        let invalid = |reason: &str| {
            RmgError::invalid_input(format!("signature '{}': {}", signature.trim(), reason))
        };

        let text = signature.trim().trim_end_matches(';').trim();
        let open = text.find('(').ok_or_else(|| invalid("missing '('"))?;
        let close = text.rfind(')').ok_or_else(|| invalid("missing ')'"))?;
        if close < open {
            return Err(invalid("unbalanced parentheses"));
        }
        let trailer = text[close + 1..].trim();
        if !(trailer.is_empty() || trailer.starts_with("throws")) {
            return Err(invalid("unexpected text after parameter list"));
        }

        let head: Vec<&str> = split_top_level(text[..open].trim(), ' ')
            .into_iter()
            .map(str::trim)
            .filter(|word| !word.is_empty() && !is_modifier(word))
            .collect();
        let (return_type, name) = match head.as_slice() {
            [return_type @ .., name] if !return_type.is_empty() => (return_type.join(" "), *name),
            _ => return Err(invalid("missing return type")),
        };
        if !is_identifier(name) {
            return Err(invalid("invalid method name"));
        }
        let return_type = TypeDesc::from_java(&return_type)?;

        let params_text = text[open + 1..close].trim();
        let mut params = Vec::new();
        if !params_text.is_empty() {
            for param in split_top_level(params_text, ',') {
                params.push(parse_parameter(param).map_err(|_| invalid("invalid parameter"))?);
            }
        }
        Ok(Self::new(name, params, return_type))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[TypeDesc] {
        &self.params
    }

    pub fn return_type(&self) -> &TypeDesc {
        &self.return_type
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    pub fn hash(&self) -> i64 {
        self.hash
    }

    pub fn descriptor(&self) -> String {
        let params: String = self.params.iter().map(TypeDesc::descriptor).collect();
        format!("({}){}", params, self.return_type.descriptor())
    }

    pub fn name_and_descriptor(&self) -> String {
        format!("{}{}", self.name, self.descriptor())
    }

    pub fn selector(&self) -> Selector {
        Selector::Method { hash: self.hash }
    }
}

fn is_modifier(word: &str) -> bool {
    matches!(
        word,
        "public" | "protected" | "private" | "abstract" | "static" | "final" | "synchronized"
            | "native" | "default"
    )
}

fn parse_parameter(param: &str) -> Result<TypeDesc, RmgError> {
    let words: Vec<&str> = split_top_level(param.trim(), ' ')
        .into_iter()
        .map(str::trim)
        .filter(|word| !word.is_empty() && *word != "final")
        .collect();
    match words.as_slice() {
        [ty] => TypeDesc::from_java(ty),
        [ty @ .., name] if is_identifier(name.trim_end_matches("[]")) => {
            let mut ty = ty.join(" ");
            // C-style `String args[]`
            let dims = name.matches("[]").count();
            ty.push_str(&"[]".repeat(dims));
            TypeDesc::from_java(&ty)
        }
        _ => TypeDesc::from_java(param),
    }
}

impl PartialEq for MethodCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for MethodCandidate {}

impl Hash for MethodCandidate {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl Ord for MethodCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        if self.hash == other.hash {
            return Ordering::Equal;
        }
        self.name
            .cmp(&other.name)
            .then_with(|| self.descriptor().cmp(&other.descriptor()))
            .then_with(|| self.hash.cmp(&other.hash))
    }
}

impl PartialOrd for MethodCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for MethodCandidate {
    type Err = RmgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for MethodCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}(", self.return_type, self.name)?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", param)?;
        }
        write!(f, ")")
    }
}

/// The method table of a pre-1.2 stub/skeleton interface.
///
/// Legacy dispatch numbers methods by their position in the table sorted by
/// name and descriptor, and checks a hash over the whole interface. The hash
/// assumes every method declares exactly `java.rmi.RemoteException`, which is
/// what wordlist-derived interfaces can offer.
#[derive(Debug, Clone)]
pub struct LegacyInterface {
    methods: Vec<MethodCandidate>,
    interface_hash: i64,
}

impl LegacyInterface {
    pub fn from_candidates(candidates: &[MethodCandidate]) -> Self {
        let mut methods = candidates.to_vec();
        methods.sort_by_key(MethodCandidate::name_and_descriptor);
        methods.dedup();

        let mut input = Vec::new();
        input.extend_from_slice(&INTERFACE_HASH_STUB_VERSION.to_be_bytes());
        for method in &methods {
            put_utf(&mut input, &method.name);
            put_utf(&mut input, &method.descriptor());
            put_utf(&mut input, "java.rmi.RemoteException");
        }
        let interface_hash = digest_to_hash(&Sha1::digest(&input));
        Self {
            methods,
            interface_hash,
        }
    }

    pub fn interface_hash(&self) -> i64 {
        self.interface_hash
    }

    pub fn methods(&self) -> &[MethodCandidate] {
        &self.methods
    }

    pub fn selector_for(&self, candidate: &MethodCandidate) -> Option<Selector> {
        self.methods
            .iter()
            .position(|method| method == candidate)
            .map(|op| Selector::Legacy {
                op: op as i32,
                interface_hash: self.interface_hash,
            })
    }
}
