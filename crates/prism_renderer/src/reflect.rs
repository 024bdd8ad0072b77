//! Program interface introspection.
//!
//! The declarations a program exposes (plain uniforms, uniform blocks,
//! fragment outputs) are scanned from the GLSL sources. The GL backend takes
//! block layouts from the driver's active-uniform queries and only borrows
//! member types from the scan; the headless backend lays every block out with
//! std140 rules, which is what the driver reports for `layout(std140)` blocks.

use std::collections::{BTreeMap, BTreeSet};

use crate::device::ShaderStage;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UniformKind {
    /// Scalars, vectors and matrices set with `glUniform*`.
    Scalar,
    Sampler,
    Block,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UniformInfo {
    pub name: String,
    pub glsl_type: String,
    pub kind: UniformKind,
    /// Index into the backend's per-program location table.
    pub location: u32,
    pub array_size: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockMember {
    pub glsl_type: String,
    pub offset: u32,
    pub array_size: u32,
    /// 0 for non-arrays.
    pub array_stride: u32,
    /// 0 for non-matrices.
    pub matrix_stride: u32,
}

/// Memory layout qualifier of a uniform block. GLSL defaults to `shared`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BlockPacking {
    Std140,
    #[default]
    Shared,
    Packed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UniformBlockInfo {
    pub name: String,
    pub index: u32,
    pub byte_size: u32,
    pub packing: BlockPacking,
    /// Struct members appear flattened as `s.a` (or `s[1].a` inside arrays).
    pub members: BTreeMap<String, BlockMember>,
}

/// One active block member as `glGetActiveUniformsiv` reports it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActiveBlockMember {
    /// Raw active name, e.g. `Tree.model`, `widths[0]` or `s.a`.
    pub name: String,
    pub array_size: i32,
    pub offset: i32,
    pub array_stride: i32,
    pub matrix_stride: i32,
}

impl UniformBlockInfo {
    /// Builds a block from driver-reported member offsets and strides. Types
    /// come from `scanned` where the source scan knows the member.
    pub fn from_driver(
        name: &str,
        index: u32,
        byte_size: u32,
        active: &[ActiveBlockMember],
        scanned: Option<&UniformBlockInfo>,
    ) -> Self {
        let members = active
            .iter()
            // -1 marks a member that is not backed by a buffer
            .filter(|m| m.offset >= 0)
            .map(|m| {
                let member = block_member_name(name, &m.name).to_string();
                let glsl_type = scanned
                    .and_then(|b| b.members.get(&member))
                    .map(|b| b.glsl_type.clone())
                    .unwrap_or_default();
                let info = BlockMember {
                    glsl_type,
                    offset: m.offset as u32,
                    array_size: m.array_size.max(1) as u32,
                    array_stride: m.array_stride.max(0) as u32,
                    matrix_stride: m.matrix_stride.max(0) as u32,
                };
                (member, info)
            })
            .collect();
        Self {
            name: name.to_string(),
            index,
            byte_size,
            packing: scanned.map(|b| b.packing).unwrap_or_default(),
            members,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputInfo {
    pub name: String,
    pub slot: u32,
}

/// Everything a linked program exposes to the host.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProgramInterface {
    pub uniforms: Vec<UniformInfo>,
    pub blocks: Vec<UniformBlockInfo>,
    pub outputs: Vec<OutputInfo>,
}

impl ProgramInterface {
    pub fn uniform(&self, name: &str) -> Option<&UniformInfo> {
        self.uniforms.iter().find(|u| u.name == name)
    }

    pub fn block(&self, name: &str) -> Option<&UniformBlockInfo> {
        self.blocks.iter().find(|b| b.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&OutputInfo> {
        self.outputs.iter().find(|o| o.name == name)
    }
}

/// Active resource names come back as `masks[0]` or `Block.member`.
pub fn normalize_name(name: &str) -> &str {
    let name = name.strip_suffix("[0]").unwrap_or(name);
    name.rsplit('.').next().unwrap_or(name)
}

/// Block member names keep their struct path: `Tree.s.a` becomes `s.a`,
/// `Tree.widths[0]` becomes `widths`.
pub fn block_member_name<'a>(block: &str, name: &'a str) -> &'a str {
    let name = name
        .strip_prefix(block)
        .and_then(|rest| rest.strip_prefix('.'))
        .unwrap_or(name);
    name.strip_suffix("[0]").unwrap_or(name)
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Ident(String),
    Number(String),
    Punct(char),
}

impl Token {
    fn is_ident(&self, word: &str) -> bool {
        matches!(self, Token::Ident(s) if s == word)
    }

    fn is_punct(&self, c: char) -> bool {
        matches!(self, Token::Punct(p) if *p == c)
    }
}

fn strip_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '/' && chars.peek() == Some(&'/') {
            for c in chars.by_ref() {
                if c == '\n' {
                    out.push('\n');
                    break;
                }
            }
        } else if c == '/' && chars.peek() == Some(&'*') {
            chars.next();
            let mut last = '\0';
            for c in chars.by_ref() {
                if last == '*' && c == '/' {
                    break;
                }
                if c == '\n' {
                    out.push('\n');
                }
                last = c;
            }
            out.push(' ');
        } else {
            out.push(c);
        }
    }
    out
}

fn tokenize(source: &str) -> Vec<Token> {
    let stripped = strip_comments(source);
    let mut tokens = Vec::new();
    for line in stripped.lines() {
        if line.trim_start().starts_with('#') {
            continue;
        }
        let mut chars = line.chars().peekable();
        while let Some(&c) = chars.peek() {
            if c.is_whitespace() {
                chars.next();
            } else if c.is_ascii_alphabetic() || c == '_' {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        word.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(word));
            } else if c.is_ascii_digit() {
                let mut number = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '.' {
                        number.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Number(number));
            } else {
                tokens.push(Token::Punct(c));
                chars.next();
            }
        }
    }
    tokens
}

/// A `type name[N]` declaration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Declaration {
    pub glsl_type: String,
    pub name: String,
    pub array_size: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockDeclaration {
    pub name: String,
    pub packing: BlockPacking,
    pub members: Vec<Declaration>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputDeclaration {
    pub name: String,
    pub location: Option<u32>,
}

/// Top-level declarations of one stage.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StageDeclarations {
    pub uniforms: Vec<Declaration>,
    pub structs: BTreeMap<String, Vec<Declaration>>,
    pub blocks: Vec<BlockDeclaration>,
    pub outputs: Vec<OutputDeclaration>,
    pub has_main: bool,
}

const SKIPPED_QUALIFIERS: &[&str] = &[
    "lowp", "mediump", "highp", "flat", "smooth", "noperspective", "const", "readonly",
];

/// Splits `float a, b[4] = ...` into declarations.
fn parse_declarations(tokens: &[Token]) -> Vec<Declaration> {
    let tokens: Vec<&Token> = tokens
        .iter()
        .filter(|t| !SKIPPED_QUALIFIERS.iter().any(|q| t.is_ident(q)))
        .collect();
    let Some(Token::Ident(glsl_type)) = tokens.first() else {
        return Vec::new();
    };

    let mut declarations = Vec::new();
    let mut i = 1;
    while i < tokens.len() {
        let Token::Ident(name) = tokens[i] else {
            i += 1;
            continue;
        };
        let mut array_size = 1;
        i += 1;
        if tokens.get(i).is_some_and(|t| t.is_punct('[')) {
            if let Some(Token::Number(n)) = tokens.get(i + 1) {
                array_size = n.trim_end_matches(['u', 'U']).parse().unwrap_or(1);
            }
            while i < tokens.len() && !tokens[i].is_punct(']') {
                i += 1;
            }
            i += 1;
        }
        declarations.push(Declaration {
            glsl_type: glsl_type.clone(),
            name: name.clone(),
            array_size,
        });
        // skip an initializer up to the next top-level comma
        let mut depth = 0;
        while i < tokens.len() {
            match tokens[i] {
                Token::Punct('(') => depth += 1,
                Token::Punct(')') => depth -= 1,
                Token::Punct(',') if depth == 0 => {
                    i += 1;
                    break;
                }
                _ => {}
            }
            i += 1;
        }
    }
    declarations
}

/// Strips a leading `layout(...)`, returning its qualifier tokens.
fn split_layout(tokens: &[Token]) -> (&[Token], &[Token]) {
    if !tokens.first().is_some_and(|t| t.is_ident("layout")) {
        return (&[], tokens);
    }
    let Some(close) = tokens.iter().position(|t| t.is_punct(')')) else {
        return (&[], tokens);
    };
    (&tokens[..close], &tokens[close + 1..])
}

fn layout_location(qualifiers: &[Token]) -> Option<u32> {
    qualifiers
        .windows(3)
        .find(|w| w[0].is_ident("location") && w[1].is_punct('='))
        .and_then(|w| match &w[2] {
            Token::Number(n) => n.parse().ok(),
            _ => None,
        })
}

fn layout_packing(qualifiers: &[Token]) -> BlockPacking {
    if qualifiers.iter().any(|t| t.is_ident("std140")) {
        BlockPacking::Std140
    } else if qualifiers.iter().any(|t| t.is_ident("packed")) {
        BlockPacking::Packed
    } else {
        BlockPacking::Shared
    }
}

fn body_declarations(body: &[Token]) -> Vec<Declaration> {
    body.split(|t| t.is_punct(';'))
        .filter(|s| !s.is_empty())
        .flat_map(|s| parse_declarations(split_layout(s).1))
        .collect()
}

/// Qualifier at parenthesis depth zero, so `void f(out vec4 c);` does not count.
fn has_top_level(tokens: &[Token], word: &str) -> bool {
    let mut depth = 0;
    for token in tokens {
        match token {
            Token::Punct('(') => depth += 1,
            Token::Punct(')') => depth -= 1,
            t if depth == 0 && t.is_ident(word) => return true,
            _ => {}
        }
    }
    false
}

/// Scans the global scope of one shader stage. Fails on unbalanced braces.
pub fn scan_stage(source: &str, stage: ShaderStage) -> Result<StageDeclarations, String> {
    let tokens = tokenize(source);
    let mut decls = StageDeclarations::default();
    let mut statement: Vec<Token> = Vec::new();
    let mut i = 0;

    while i < tokens.len() {
        let token = &tokens[i];
        i += 1;
        match token {
            Token::Punct(';') => {
                handle_statement(&statement, stage, &mut decls);
                statement.clear();
            }
            Token::Punct('{') => {
                let body_start = i;
                let mut depth = 1;
                while i < tokens.len() && depth > 0 {
                    match tokens[i] {
                        Token::Punct('{') => depth += 1,
                        Token::Punct('}') => depth -= 1,
                        _ => {}
                    }
                    i += 1;
                }
                if depth != 0 {
                    return Err("unexpected end of file: unbalanced `{`".to_string());
                }
                let body = &tokens[body_start..i - 1];

                if has_top_level(&statement, "uniform") {
                    let (qualifiers, head) = split_layout(&statement);
                    let name = head.iter().rev().find_map(|t| match t {
                        Token::Ident(s) if s != "uniform" => Some(s.clone()),
                        _ => None,
                    });
                    decls.blocks.push(BlockDeclaration {
                        name: name.unwrap_or_default(),
                        packing: layout_packing(qualifiers),
                        members: body_declarations(body),
                    });
                    // optional instance name up to the `;`
                    while i < tokens.len() && !tokens[i].is_punct(';') {
                        i += 1;
                    }
                    i += 1;
                } else if statement.first().is_some_and(|t| t.is_ident("struct")) {
                    if let Some(Token::Ident(name)) = statement.get(1) {
                        decls.structs.insert(name.clone(), body_declarations(body));
                    }
                    // `struct S { ... } s;` also declares a variable; it is not uniform
                    while i < tokens.len() && !tokens[i].is_punct(';') {
                        i += 1;
                    }
                    i += 1;
                } else if statement
                    .windows(2)
                    .any(|w| w[0].is_ident("main") && w[1].is_punct('('))
                {
                    decls.has_main = true;
                }
                statement.clear();
            }
            Token::Punct('}') => return Err("unbalanced `}`".to_string()),
            _ => statement.push(token.clone()),
        }
    }
    Ok(decls)
}

fn handle_statement(statement: &[Token], stage: ShaderStage, decls: &mut StageDeclarations) {
    if statement.is_empty() {
        return;
    }
    let (qualifiers, rest) = split_layout(statement);
    let location = layout_location(qualifiers);
    if has_top_level(rest, "uniform") {
        let after: Vec<Token> = rest
            .iter()
            .filter(|t| !t.is_ident("uniform"))
            .cloned()
            .collect();
        decls.uniforms.extend(parse_declarations(&after));
    } else if stage == ShaderStage::Fragment && rest.first().is_some_and(|t| t.is_ident("out")) {
        for (n, declaration) in parse_declarations(&rest[1..]).into_iter().enumerate() {
            decls.outputs.push(OutputDeclaration {
                name: declaration.name,
                location: location.map(|l| l + n as u32),
            });
        }
    }
}

pub type StructTable = BTreeMap<String, Vec<Declaration>>;

/// (size, alignment) of one std140 element, plus its matrix column stride.
/// Structs align to 16 and pad their size to a multiple of 16.
fn std140_element(glsl_type: &str, structs: &StructTable) -> (u32, u32, u32) {
    match glsl_type {
        "float" | "int" | "uint" | "bool" => (4, 4, 0),
        "vec2" | "ivec2" | "uvec2" | "bvec2" => (8, 8, 0),
        "vec3" | "ivec3" | "uvec3" | "bvec3" => (12, 16, 0),
        "vec4" | "ivec4" | "uvec4" | "bvec4" => (16, 16, 0),
        "mat2" => (32, 16, 16),
        "mat3" => (48, 16, 16),
        "mat4" => (64, 16, 16),
        other => match structs.get(other) {
            Some(fields) => {
                let mut scratch = BTreeMap::new();
                let end = place_std140(fields, structs, 0, "", &mut scratch);
                (round_up(end, 16), 16, 0)
            }
            None => {
                log::warn!("std140: unsupported block member type `{other}`, treating as vec4");
                (16, 16, 0)
            }
        },
    }
}

fn round_up(value: u32, alignment: u32) -> u32 {
    value.div_ceil(alignment) * alignment
}

/// Lays `members` out from `offset`, inserting `prefix + name` entries and
/// flattened struct fields. Returns the offset past the last member.
fn place_std140(
    members: &[Declaration],
    structs: &StructTable,
    mut offset: u32,
    prefix: &str,
    layout: &mut BTreeMap<String, BlockMember>,
) -> u32 {
    for member in members {
        let (size, align, matrix_stride) = std140_element(&member.glsl_type, structs);
        let (total, align, array_stride) = if member.array_size > 1 {
            let stride = round_up(size, 16);
            (stride * member.array_size, 16, stride)
        } else {
            (size, align, 0)
        };
        offset = round_up(offset, align);
        let name = format!("{prefix}{}", member.name);
        if let Some(fields) = structs.get(&member.glsl_type) {
            if member.array_size > 1 {
                for element in 0..member.array_size {
                    let base = offset + element * array_stride;
                    place_std140(fields, structs, base, &format!("{name}[{element}]."), layout);
                }
            } else {
                place_std140(fields, structs, offset, &format!("{name}."), layout);
            }
        }
        layout.insert(
            name,
            BlockMember {
                glsl_type: member.glsl_type.clone(),
                offset,
                array_size: member.array_size,
                array_stride,
                matrix_stride,
            },
        );
        offset += total;
    }
    offset
}

/// std140 offsets and strides for a block's members, plus the block size.
pub fn std140_layout(members: &[Declaration]) -> (BTreeMap<String, BlockMember>, u32) {
    std140_layout_with_structs(members, &StructTable::new())
}

/// Like [`std140_layout`] for blocks whose members use declared structs.
pub fn std140_layout_with_structs(
    members: &[Declaration],
    structs: &StructTable,
) -> (BTreeMap<String, BlockMember>, u32) {
    let mut layout = BTreeMap::new();
    let end = place_std140(members, structs, 0, "", &mut layout);
    (layout, round_up(end, 16))
}

pub fn is_sampler_type(glsl_type: &str) -> bool {
    ["sampler", "isampler", "usampler", "image"]
        .iter()
        .any(|prefix| glsl_type.starts_with(prefix))
}

/// Merges the per-stage scans into one interface. Uniform locations are
/// assigned in order of first appearance.
pub fn merge_stages(stages: &[(ShaderStage, StageDeclarations)]) -> ProgramInterface {
    let mut interface = ProgramInterface::default();
    let mut seen = BTreeSet::new();
    let structs: StructTable = stages
        .iter()
        .flat_map(|(_, decls)| decls.structs.clone())
        .collect();

    for (_, decls) in stages {
        for uniform in &decls.uniforms {
            if !seen.insert(uniform.name.clone()) {
                continue;
            }
            let kind = if is_sampler_type(&uniform.glsl_type) {
                UniformKind::Sampler
            } else {
                UniformKind::Scalar
            };
            interface.uniforms.push(UniformInfo {
                name: uniform.name.clone(),
                glsl_type: uniform.glsl_type.clone(),
                kind,
                location: interface.uniforms.len() as u32,
                array_size: uniform.array_size,
            });
        }
        for block in &decls.blocks {
            if interface.block(&block.name).is_some() {
                continue;
            }
            // shared and packed layouts are only known after linking
            let (members, byte_size) = std140_layout_with_structs(&block.members, &structs);
            interface.blocks.push(UniformBlockInfo {
                name: block.name.clone(),
                index: interface.blocks.len() as u32,
                byte_size,
                packing: block.packing,
                members,
            });
        }
    }

    if let Some((_, fragment)) = stages.iter().find(|(s, _)| *s == ShaderStage::Fragment) {
        let mut used: BTreeSet<u32> = fragment.outputs.iter().filter_map(|o| o.location).collect();
        let mut next = 0;
        for output in &fragment.outputs {
            let slot = match output.location {
                Some(slot) => slot,
                None => {
                    while used.contains(&next) {
                        next += 1;
                    }
                    used.insert(next);
                    next
                }
            };
            interface.outputs.push(OutputInfo {
                name: output.name.clone(),
                slot,
            });
        }
    }
    interface
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAGMENT: &str = r#"
        #version 430
        // uniform float commented;
        /* uniform float alsoCommented; */
        in vec2 passUV;
        uniform sampler2D colorMap;
        uniform highp float strength = 0.5, bias;
        uniform float masks[17];
        layout(std140) uniform Tree {
            mat4 model;
            vec3 windDirection;
            float branchWidth[4];
        } tree;
        layout(location = 1) out vec4 fragNormal;
        out vec4 fragColor;

        vec4 shade(out vec4 unused) { return vec4(1.0); }

        void main() {
            fragColor = texture(colorMap, passUV) * strength;
            if (bias > 0.0) { fragNormal = vec4(0.0); }
        }
    "#;

    #[test]
    fn test_scan_fragment_stage() {
        let decls = scan_stage(FRAGMENT, ShaderStage::Fragment).unwrap();
        assert!(decls.has_main);

        let names: Vec<_> = decls.uniforms.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, ["colorMap", "strength", "bias", "masks"]);
        assert_eq!(decls.uniforms[3].array_size, 17);

        assert_eq!(decls.blocks.len(), 1);
        assert_eq!(decls.blocks[0].name, "Tree");
        assert_eq!(decls.blocks[0].members.len(), 3);

        assert_eq!(
            decls.outputs,
            vec![
                OutputDeclaration {
                    name: "fragNormal".into(),
                    location: Some(1)
                },
                OutputDeclaration {
                    name: "fragColor".into(),
                    location: None
                },
            ]
        );
    }

    #[test]
    fn test_implicit_output_slots_skip_explicit_ones() {
        let decls = scan_stage(FRAGMENT, ShaderStage::Fragment).unwrap();
        let interface = merge_stages(&[(ShaderStage::Fragment, decls)]);
        assert_eq!(interface.output("fragNormal").unwrap().slot, 1);
        assert_eq!(interface.output("fragColor").unwrap().slot, 0);
        assert_eq!(interface.uniform("colorMap").unwrap().kind, UniformKind::Sampler);
    }

    #[test]
    fn test_std140_offsets() {
        let members = vec![
            Declaration { glsl_type: "float".into(), name: "a".into(), array_size: 1 },
            Declaration { glsl_type: "vec3".into(), name: "dir".into(), array_size: 1 },
            Declaration { glsl_type: "float".into(), name: "b".into(), array_size: 1 },
            Declaration { glsl_type: "mat4".into(), name: "model".into(), array_size: 1 },
            Declaration { glsl_type: "float".into(), name: "weights".into(), array_size: 3 },
        ];
        let (layout, size) = std140_layout(&members);
        assert_eq!(layout["a"].offset, 0);
        assert_eq!(layout["dir"].offset, 16);
        // a float may pack into the tail of a vec3
        assert_eq!(layout["b"].offset, 28);
        assert_eq!(layout["model"].offset, 32);
        assert_eq!(layout["model"].matrix_stride, 16);
        assert_eq!(layout["weights"].offset, 96);
        assert_eq!(layout["weights"].array_stride, 16);
        assert_eq!(size, 144);
    }

    #[test]
    fn test_unbalanced_braces_are_rejected() {
        assert!(scan_stage("void main() {", ShaderStage::Vertex).is_err());
        assert!(scan_stage("void main() {} }", ShaderStage::Vertex).is_err());
    }

    #[test]
    fn test_vertex_outputs_are_not_fragment_outputs() {
        let decls = scan_stage("out vec2 passUV; void main() {}", ShaderStage::Vertex).unwrap();
        assert!(decls.outputs.is_empty());
    }

    #[test]
    fn test_normalize_active_names() {
        assert_eq!(normalize_name("masks[0]"), "masks");
        assert_eq!(normalize_name("Tree.model"), "model");
        assert_eq!(normalize_name("plain"), "plain");
        assert_eq!(block_member_name("Tree", "Tree.s.a"), "s.a");
        assert_eq!(block_member_name("Tree", "widths[0]"), "widths");
        assert_eq!(block_member_name("Tree", "s[1].a"), "s[1].a");
    }

    const STRUCT_BLOCK: &str = r#"
        struct S { vec4 a; vec4 b; };
        layout(std140) uniform B { S s; float k; };
        uniform Shared { float x; vec3 y; };
        layout(packed) uniform Packed { float z; };
        out vec4 color;
        void main() { color = s.a * k; }
    "#;

    #[test]
    fn test_std140_struct_members_align_to_vec4() {
        let decls = scan_stage(STRUCT_BLOCK, ShaderStage::Fragment).unwrap();
        assert_eq!(decls.structs["S"].len(), 2);
        let interface = merge_stages(&[(ShaderStage::Fragment, decls)]);

        let block = interface.block("B").unwrap();
        assert_eq!(block.members["s"].offset, 0);
        assert_eq!(block.members["s.b"].offset, 16);
        assert_eq!(block.members["k"].offset, 32);
        assert_eq!(block.byte_size, 48);
    }

    #[test]
    fn test_struct_arrays_repeat_at_struct_stride() {
        let structs = StructTable::from([(
            "L".to_string(),
            vec![
                Declaration { glsl_type: "vec3".into(), name: "dir".into(), array_size: 1 },
                Declaration { glsl_type: "float".into(), name: "power".into(), array_size: 1 },
                Declaration { glsl_type: "vec2".into(), name: "uv".into(), array_size: 1 },
            ],
        )]);
        let members = vec![
            Declaration { glsl_type: "L".into(), name: "lights".into(), array_size: 2 },
            Declaration { glsl_type: "float".into(), name: "k".into(), array_size: 1 },
        ];
        let (layout, size) = std140_layout_with_structs(&members, &structs);
        assert_eq!(layout["lights"].array_stride, 32);
        assert_eq!(layout["lights[0].power"].offset, 12);
        assert_eq!(layout["lights[1].uv"].offset, 48);
        assert_eq!(layout["k"].offset, 64);
        assert_eq!(size, 80);
    }

    #[test]
    fn test_block_packing_is_recorded() {
        let decls = scan_stage(STRUCT_BLOCK, ShaderStage::Fragment).unwrap();
        let packing: Vec<_> = decls.blocks.iter().map(|b| (b.name.as_str(), b.packing)).collect();
        assert_eq!(
            packing,
            [
                ("B", BlockPacking::Std140),
                ("Shared", BlockPacking::Shared),
                ("Packed", BlockPacking::Packed)
            ]
        );
        // the instance-less struct statement is not a uniform
        assert!(decls.uniforms.is_empty());
    }

    #[test]
    fn test_driver_offsets_override_the_scan() {
        let decls = scan_stage(STRUCT_BLOCK, ShaderStage::Fragment).unwrap();
        let interface = merge_stages(&[(ShaderStage::Fragment, decls)]);
        let scanned = interface.block("Shared");

        // a shared block the driver chose to pack tightly
        let active = [
            ActiveBlockMember {
                name: "x".into(),
                array_size: 1,
                offset: 12,
                array_stride: 0,
                matrix_stride: 0,
            },
            ActiveBlockMember {
                name: "y".into(),
                array_size: 1,
                offset: 0,
                array_stride: 0,
                matrix_stride: 0,
            },
        ];
        let block = UniformBlockInfo::from_driver("Shared", 3, 16, &active, scanned);
        assert_eq!(block.index, 3);
        assert_eq!(block.byte_size, 16);
        assert_eq!(block.packing, BlockPacking::Shared);
        assert_eq!(block.members["x"].offset, 12);
        assert_eq!(block.members["y"].offset, 0);
        assert_eq!(block.members["y"].glsl_type, "vec3");
        assert_ne!(scanned.unwrap().members["x"], block.members["x"]);
    }
}
