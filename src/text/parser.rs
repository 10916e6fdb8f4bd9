//! Recursive-descent parser for the textual IR (spec §6).
//!
//! No error recovery: the first malformed token aborts the whole parse.
//! Forward references are supported for basic blocks (scanned once up
//! front per function) and for phi incoming values (resolved in a second
//! pass once every instruction in the function has a name); every other
//! reference — globals, functions, named struct types — must already be
//! declared by the time it's used.

use std::collections::HashMap;

use crate::builder::Builder;
use crate::common::source::Span;
use crate::context::Context;
use crate::ids::{BlockId, ConstId, FuncId, GlobalId, TypeId};
use crate::ir::instruction::{FCmpPred, ICmpPred};
use crate::types::Type;
use crate::value::ValueRef;

use super::lexer::{LexError, Lexer, Token, TokenKind};

#[derive(Debug, Clone)]
pub struct ParseError {
    pub message: String,
    pub span: Span,
}

impl From<LexError> for ParseError {
    fn from(e: LexError) -> Self {
        ParseError { message: e.message, span: e.span }
    }
}

pub fn parse_module(ctx: &mut Context, source: &str, file_id: u32) -> Result<crate::ids::ModuleId, ParseError> {
    let tokens = Lexer::new(source, file_id).tokenize()?;
    let mut p = Parser::new(ctx, tokens);
    p.parse_module()
}

struct Parser<'ctx> {
    ctx: &'ctx mut Context,
    tokens: Vec<Token>,
    pos: usize,
    funcs: HashMap<String, FuncId>,
    globals: HashMap<String, GlobalId>,
    anon_counter: u32,
}

/// A phi incoming pair whose value name wasn't yet in scope when parsed;
/// resolved once the whole function body has been read.
struct PendingIncoming {
    phi: crate::ids::InstId,
    name: String,
    ty: TypeId,
    from: BlockId,
    span: Span,
}

struct FnScope {
    blocks: HashMap<String, BlockId>,
    values: HashMap<String, ValueRef>,
    pending: Vec<PendingIncoming>,
}

impl<'ctx> Parser<'ctx> {
    fn new(ctx: &'ctx mut Context, tokens: Vec<Token>) -> Self {
        Parser { ctx, tokens, pos: 0, funcs: HashMap::new(), globals: HashMap::new(), anon_counter: 0 }
    }

    // ---- token plumbing -----------------------------------------------------

    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn peek_kind(&self, offset: usize) -> &TokenKind {
        &self.tokens[(self.pos + offset).min(self.tokens.len() - 1)].kind
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn err(&self, message: impl Into<String>) -> ParseError {
        ParseError { message: message.into(), span: self.peek().span }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, ParseError> {
        if self.peek().kind == kind {
            Ok(self.advance())
        } else {
            Err(self.err(format!("expected `{}`, found `{}`", kind.describe(), self.peek().kind.describe())))
        }
    }

    fn expect_ident(&mut self, word: &str) -> Result<(), ParseError> {
        match &self.peek().kind {
            TokenKind::Ident(s) if s == word => {
                self.advance();
                Ok(())
            }
            other => Err(self.err(format!("expected `{word}`, found `{}`", other.describe()))),
        }
    }

    fn eat_ident(&mut self, word: &str) -> bool {
        if matches!(&self.peek().kind, TokenKind::Ident(s) if s == word) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_local(&mut self) -> Result<String, ParseError> {
        match self.advance().kind {
            TokenKind::Local(s) => Ok(s),
            other => Err(ParseError { message: format!("expected a local name, found `{}`", other.describe()), span: self.peek().span }),
        }
    }

    fn expect_global(&mut self) -> Result<String, ParseError> {
        match self.advance().kind {
            TokenKind::Global(s) => Ok(s),
            other => Err(ParseError { message: format!("expected a global name, found `{}`", other.describe()), span: self.peek().span }),
        }
    }

    fn expect_label(&mut self) -> Result<String, ParseError> {
        match self.advance().kind {
            TokenKind::Label(s) => Ok(s),
            other => Err(ParseError { message: format!("expected a block label, found `{}`", other.describe()), span: self.peek().span }),
        }
    }

    // ---- top level -----------------------------------------------------------

    fn parse_module(&mut self) -> Result<crate::ids::ModuleId, ParseError> {
        let mut module_name = None;
        if self.eat_ident("module") {
            match self.advance().kind {
                TokenKind::Ident(s) => module_name = Some(s),
                other => return Err(ParseError { message: format!("expected a module name, found `{}`", other.describe()), span: self.peek().span }),
            }
        }
        let module = self.ctx.new_module(module_name);

        while !self.peek().is_eof() {
            self.parse_top_level_item(module)?;
        }
        Ok(module)
    }

    fn parse_top_level_item(&mut self, module: crate::ids::ModuleId) -> Result<(), ParseError> {
        match self.peek().kind.clone() {
            TokenKind::Local(_) => self.parse_type_def(),
            TokenKind::Global(_) => self.parse_global_def(module).map(|_| ()),
            TokenKind::Ident(ref s) if s == "declare" => self.parse_declare(module).map(|_| ()),
            TokenKind::Ident(ref s) if s == "define" => self.parse_define(module).map(|_| ()),
            ref other => Err(self.err(format!("expected a top-level item, found `{}`", other.describe()))),
        }
    }

    fn parse_type_def(&mut self) -> Result<(), ParseError> {
        let name = self.expect_local()?;
        self.expect(TokenKind::Equals)?;
        self.expect_ident("type")?;
        let sym = self.ctx.intern(&name);
        let ty = self.ctx.named_struct(sym);
        self.expect(TokenKind::LBrace)?;
        let mut members = Vec::new();
        if self.peek().kind != TokenKind::RBrace {
            loop {
                members.push(self.parse_type()?);
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RBrace)?;
        self.ctx.define_named_struct_body(ty, members);
        Ok(())
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.peek().kind == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn parse_global_def(&mut self, module: crate::ids::ModuleId) -> Result<GlobalId, ParseError> {
        let name = self.expect_global()?;
        self.expect(TokenKind::Colon)?;
        let allocated_ty = self.parse_type()?;
        self.expect(TokenKind::Equals)?;
        self.expect_ident("global")?;
        let init = if self.eat_ident("zeroinitializer") {
            None
        } else {
            let (value, ty) = self.parse_typed_constant_operand(allocated_ty)?;
            if ty != allocated_ty {
                return Err(self.err("global initializer type does not match the declared type"));
            }
            Some(value)
        };
        let sym = self.ctx.intern(&name);
        let id = self.ctx.new_global(module, sym, allocated_ty, init);
        self.globals.insert(name, id);
        Ok(id)
    }

    fn parse_typed_constant_operand(&mut self, expected: TypeId) -> Result<(ConstId, TypeId), ParseError> {
        let tok = self.advance();
        self.expect(TokenKind::Colon)?;
        let ty = self.parse_type()?;
        let cid = match tok.kind {
            TokenKind::Int(n) => self.ctx.const_int(ty, n),
            TokenKind::Float(f) => self.ctx.const_float(ty, f.to_bits()),
            TokenKind::Ident(ref s) if s == "true" => self.ctx.const_int(ty, 1),
            TokenKind::Ident(ref s) if s == "false" => self.ctx.const_int(ty, 0),
            TokenKind::Ident(ref s) if s == "undef" => self.ctx.const_undef(ty),
            other => return Err(ParseError { message: format!("expected a constant, found `{}`", other.describe()), span: tok.span }),
        };
        let _ = expected;
        Ok((cid, ty))
    }

    fn parse_param_list(&mut self, want_names: bool) -> Result<(Vec<TypeId>, Vec<Option<String>>, bool), ParseError> {
        self.expect(TokenKind::LParen)?;
        let mut types = Vec::new();
        let mut names = Vec::new();
        let mut variadic = false;
        if self.peek().kind != TokenKind::RParen {
            loop {
                if self.eat(TokenKind::Ellipsis) {
                    variadic = true;
                    break;
                }
                types.push(self.parse_type()?);
                if want_names {
                    names.push(Some(self.expect_local()?));
                } else {
                    names.push(None);
                }
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen)?;
        Ok((types, names, variadic))
    }

    fn parse_declare(&mut self, module: crate::ids::ModuleId) -> Result<FuncId, ParseError> {
        self.expect_ident("declare")?;
        let ret_ty = self.parse_type()?;
        let name = self.expect_global()?;
        let (param_types, _, variadic) = self.parse_param_list(false)?;
        let sym = self.ctx.intern(&name);
        let func = self.ctx.new_function(module, sym, ret_ty, &param_types, &vec![None; param_types.len()], variadic, true);
        self.funcs.insert(name, func);
        Ok(func)
    }

    fn parse_define(&mut self, module: crate::ids::ModuleId) -> Result<FuncId, ParseError> {
        self.expect_ident("define")?;
        let ret_ty = self.parse_type()?;
        let name = self.expect_global()?;
        let (param_types, param_names, variadic) = self.parse_param_list(true)?;
        let sym = self.ctx.intern(&name);
        let arg_syms: Vec<Option<crate::ids::Sym>> = param_names.iter().map(|n| n.as_ref().map(|s| self.ctx.intern(s))).collect();
        let func = self.ctx.new_function(module, sym, ret_ty, &param_types, &arg_syms, variadic, false);
        self.funcs.insert(name.clone(), func);

        let mut scope = FnScope { blocks: HashMap::new(), values: HashMap::new(), pending: Vec::new() };
        for (i, n) in param_names.iter().enumerate() {
            if let Some(n) = n {
                scope.values.insert(n.clone(), ValueRef::Argument(self.ctx.func(func).args[i]));
            }
        }

        self.expect(TokenKind::LBrace)?;
        self.prescan_block_labels(func, &mut scope)?;
        self.parse_function_body(func, &mut scope)?;
        self.expect(TokenKind::RBrace)?;

        for pending in std::mem::take(&mut scope.pending) {
            let value = *scope.values.get(&pending.name).ok_or_else(|| ParseError {
                message: format!("phi incoming value `%{}` is never defined", pending.name),
                span: pending.span,
            })?;
            if self.ctx.value_type(value) != pending.ty {
                return Err(ParseError { message: "phi incoming value type mismatch".into(), span: pending.span });
            }
            let mut b = Builder::new(self.ctx);
            b.add_incoming(pending.phi, value, pending.from);
        }
        Ok(func)
    }

    /// Scans `$label:` headers within the current function body (tracking
    /// brace nesting so nested aggregate/type syntax doesn't confuse block
    /// boundaries) and pre-creates every block, so forward branches and
    /// loop-carried phi edges can resolve their target before it's parsed.
    fn prescan_block_labels(&mut self, func: FuncId, scope: &mut FnScope) -> Result<(), ParseError> {
        let mut depth = 1i32;
        let mut i = self.pos;
        while depth > 0 {
            match &self.tokens[i].kind {
                TokenKind::LBrace => depth += 1,
                TokenKind::RBrace => depth -= 1,
                TokenKind::Label(name) if depth == 1 && self.tokens.get(i + 1).map(|t| &t.kind) == Some(&TokenKind::Colon) => {
                    if scope.blocks.contains_key(name) {
                        return Err(ParseError { message: format!("block `${name}` is already defined in this function"), span: self.tokens[i].span });
                    }
                    let sym = self.ctx.intern(name);
                    let block = self.ctx.append_block(func, Some(sym));
                    scope.blocks.insert(name.clone(), block);
                }
                TokenKind::Eof => return Err(ParseError { message: "unterminated function body".into(), span: self.tokens[i].span }),
                _ => {}
            }
            i += 1;
        }
        Ok(())
    }

    fn parse_function_body(&mut self, func: FuncId, scope: &mut FnScope) -> Result<(), ParseError> {
        let blocks = self.ctx.func(func).blocks.clone();
        for block in blocks {
            let label = self.expect_label()?;
            self.expect(TokenKind::Colon)?;
            debug_assert_eq!(scope.blocks.get(&label).copied(), Some(block));
            loop {
                self.parse_instruction(block, scope)?;
                if self.ctx.block_insts(block).last().map(|&i| self.ctx.inst(i).opcode.is_terminator()).unwrap_or(false) {
                    break;
                }
            }
        }
        Ok(())
    }

    // ---- instructions ---------------------------------------------------------

    fn parse_instruction(&mut self, block: BlockId, scope: &mut FnScope) -> Result<(), ParseError> {
        let result_name = if matches!(self.peek().kind, TokenKind::Local(_)) && *self.peek_kind(1) == TokenKind::Colon {
            let name = self.expect_local()?;
            self.expect(TokenKind::Colon)?;
            let ty = self.parse_type()?;
            self.expect(TokenKind::Equals)?;
            Some((name, ty))
        } else {
            None
        };

        let op_tok = self.advance();
        let mnemonic = match op_tok.kind {
            TokenKind::Ident(s) => s,
            other => return Err(ParseError { message: format!("expected an opcode, found `{}`", other.describe()), span: op_tok.span }),
        };

        let inst = match mnemonic.as_str() {
            "ret" => self.parse_ret(block, scope)?,
            "br" => self.parse_br(block, scope)?,
            "cond_br" => self.parse_cond_br(block, scope)?,
            "switch" => self.parse_switch(block, scope)?,
            "add" | "sub" | "mul" | "udiv" | "sdiv" | "urem" | "srem" | "shl" | "lshr" | "ashr" | "and" | "or" | "xor" | "fadd" | "fsub"
            | "fmul" | "fdiv" => Some(self.parse_binop(&mnemonic, block, scope)?),
            "icmp" => Some(self.parse_icmp(block, scope)?),
            "fcmp" => Some(self.parse_fcmp(block, scope)?),
            "trunc" | "zext" | "sext" | "fptrunc" | "fpext" | "fptoui" | "fptosi" | "uitofp" | "sitofp" | "ptrtoint" | "inttoptr" | "bitcast" => {
                Some(self.parse_cast(&mnemonic, block, scope)?)
            }
            "alloca" => Some(self.parse_alloca(block)?),
            "load" => Some(self.parse_load(block, scope)?),
            "store" => {
                self.parse_store(block, scope)?;
                None
            }
            "gep" => Some(self.parse_gep(block, scope)?),
            "phi" => {
                let (_, ty) = result_name.clone().ok_or_else(|| self.err("phi requires a result binding"))?;
                Some(self.parse_phi(block, ty, scope)?)
            }
            "select" => Some(self.parse_select(block, scope)?),
            "call" => Some(self.parse_call(block, scope)?),
            other => return Err(ParseError { message: format!("unknown opcode `{other}`"), span: op_tok.span }),
        };

        // Every `build_*` call above freshly constructed its own `Builder`,
        // so its auto-generated result name (always "0", per
        // `Builder::fresh_name` starting over each time) is not unique
        // across the function. Replace it with the real source name, or a
        // counter that is, so printed output doesn't collide two distinct
        // values onto the same token.
        if let Some(inst) = inst {
            if self.ctx.inst(inst).opcode.has_result() {
                let sym = match &result_name {
                    Some((name, _)) => self.ctx.intern(name),
                    None => {
                        let n = self.anon_counter;
                        self.anon_counter += 1;
                        self.ctx.intern(&format!("_anon{n}"))
                    }
                };
                self.ctx.inst_mut(inst).name = Some(sym);
            }
        }

        if let Some((name, declared_ty)) = result_name {
            let inst = inst.ok_or_else(|| self.err("this opcode never produces a result"))?;
            let actual = self.ctx.inst(inst).result_ty.expect("result binding requires a typed instruction");
            if actual != declared_ty {
                return Err(self.err("declared result type does not match the instruction's actual result type"));
            }
            if scope.values.contains_key(&name) {
                return Err(self.err(format!("value `%{name}` is already defined in this function")));
            }
            scope.values.insert(name, ValueRef::Instruction(inst));
        }
        Ok(())
    }

    fn builder(&mut self) -> Builder<'_> {
        Builder::new(self.ctx)
    }

    fn parse_typed_operand(&mut self, scope: &FnScope) -> Result<(ValueRef, TypeId), ParseError> {
        let tok = self.advance();
        self.expect(TokenKind::Colon)?;
        let ty = self.parse_type()?;
        let value = self.resolve_value_token(&tok, ty, scope)?;
        Ok((value, ty))
    }

    fn resolve_value_token(&mut self, tok: &Token, ty: TypeId, scope: &FnScope) -> Result<ValueRef, ParseError> {
        match &tok.kind {
            TokenKind::Local(name) => scope
                .values
                .get(name)
                .copied()
                .ok_or_else(|| ParseError { message: format!("use of undefined value `%{name}`"), span: tok.span }),
            TokenKind::Global(name) => self.resolve_global_value(name, tok.span),
            TokenKind::Int(n) => Ok(ValueRef::Constant(self.ctx.const_int(ty, *n))),
            TokenKind::Float(f) => Ok(ValueRef::Constant(self.ctx.const_float(ty, f.to_bits()))),
            TokenKind::Ident(s) if s == "true" => Ok(ValueRef::Constant(self.ctx.const_int(ty, 1))),
            TokenKind::Ident(s) if s == "false" => Ok(ValueRef::Constant(self.ctx.const_int(ty, 0))),
            TokenKind::Ident(s) if s == "undef" => Ok(ValueRef::Constant(self.ctx.const_undef(ty))),
            other => Err(ParseError { message: format!("expected a value, found `{}`", other.describe()), span: tok.span }),
        }
    }

    fn resolve_global_value(&self, name: &str, span: Span) -> Result<ValueRef, ParseError> {
        if let Some(&f) = self.funcs.get(name) {
            return Ok(ValueRef::Function(f));
        }
        if let Some(&g) = self.globals.get(name) {
            return Ok(ValueRef::Global(g));
        }
        Err(ParseError { message: format!("use of undefined global `@{name}`"), span })
    }

    // ---- operand type pre-validation -----------------------------------------
    //
    // `Builder`'s `build_*` methods enforce type agreement with
    // `assert_eq!`/`assert!`/`panic!`, correct for a programmatic caller
    // (a violation there is a contract bug). Parsed text is untrusted
    // input, not a contract violation, so every call below that could hit
    // one of those asserts is preceded by the matching check here and
    // surfaced as a `ParseError` instead of aborting the process.

    fn check_types_match(&self, a: TypeId, b: TypeId, what: &str) -> Result<(), ParseError> {
        if a == b {
            Ok(())
        } else {
            Err(self.err(format!("{what}: operand types must match")))
        }
    }

    fn check_int(&self, ty: TypeId, what: &str) -> Result<(), ParseError> {
        if self.ctx.type_kind(ty).is_integer() {
            Ok(())
        } else {
            Err(self.err(format!("{what}: operand must be an integer type")))
        }
    }

    fn check_float(&self, ty: TypeId, what: &str) -> Result<(), ParseError> {
        if self.ctx.type_kind(ty).is_float() {
            Ok(())
        } else {
            Err(self.err(format!("{what}: operand must be a float type")))
        }
    }

    fn check_i1(&self, ty: TypeId, what: &str) -> Result<(), ParseError> {
        if ty == self.ctx.i1_ty {
            Ok(())
        } else {
            Err(self.err(format!("{what}: operand must be i1")))
        }
    }

    fn check_pointer(&self, ty: TypeId, what: &str) -> Result<(), ParseError> {
        if self.ctx.type_kind(ty).is_pointer() {
            Ok(())
        } else {
            Err(self.err(format!("{what}: operand must be a pointer")))
        }
    }

    fn checked_int_bits(&self, ty: TypeId, what: &str) -> Result<u32, ParseError> {
        self.ctx
            .type_kind(ty)
            .as_int_width()
            .map(|w| w.bits())
            .ok_or_else(|| self.err(format!("{what}: operand must be an integer type")))
    }

    /// `false` for any type `DefaultHostLayout::layout` would panic on
    /// (labels, function types, opaque named structs, or an aggregate
    /// that recursively contains one).
    fn type_has_known_size(&self, ty: TypeId) -> bool {
        match self.ctx.type_kind(ty).clone() {
            Type::Label | Type::Function { .. } => false,
            Type::NamedStruct { members: None, .. } => false,
            Type::Array(elem, _) => self.type_has_known_size(elem),
            Type::AnonStruct(members) => members.iter().all(|&m| self.type_has_known_size(m)),
            Type::NamedStruct { members: Some(members), .. } => members.iter().all(|&m| self.type_has_known_size(m)),
            _ => true,
        }
    }

    fn checked_byte_size(&self, ty: TypeId, what: &str) -> Result<u64, ParseError> {
        use crate::interp::host_layout::{DefaultHostLayout, HostLayout};
        if !self.type_has_known_size(ty) {
            return Err(self.err(format!("{what}: operand type has no known size")));
        }
        Ok(DefaultHostLayout.layout(self.ctx, ty).0)
    }

    fn parse_ret(&mut self, block: BlockId, scope: &mut FnScope) -> Result<Option<crate::ids::InstId>, ParseError> {
        let value = if matches!(self.peek().kind, TokenKind::Label(_) | TokenKind::RBrace) { None } else { Some(self.parse_typed_operand(scope)?.0) };
        let mut b = self.builder();
        b.set_insertion_point(block);
        Ok(Some(b.build_ret(value)))
    }

    fn target_block(&self, name: &str, span: Span, scope: &FnScope) -> Result<BlockId, ParseError> {
        scope.blocks.get(name).copied().ok_or_else(|| ParseError { message: format!("branch to undeclared block `${name}`"), span })
    }

    fn parse_br(&mut self, block: BlockId, scope: &mut FnScope) -> Result<Option<crate::ids::InstId>, ParseError> {
        let tok_span = self.peek().span;
        let label = self.expect_label()?;
        let target = self.target_block(&label, tok_span, scope)?;
        let mut b = self.builder();
        b.set_insertion_point(block);
        Ok(Some(b.build_br(target)))
    }

    fn parse_cond_br(&mut self, block: BlockId, scope: &mut FnScope) -> Result<Option<crate::ids::InstId>, ParseError> {
        let (cond, cond_ty) = self.parse_typed_operand(scope)?;
        self.check_i1(cond_ty, "cond_br")?;
        self.expect(TokenKind::Comma)?;
        let then_span = self.peek().span;
        let then_label = self.expect_label()?;
        let then_bb = self.target_block(&then_label, then_span, scope)?;
        self.expect(TokenKind::Comma)?;
        let else_span = self.peek().span;
        let else_label = self.expect_label()?;
        let else_bb = self.target_block(&else_label, else_span, scope)?;
        let mut b = self.builder();
        b.set_insertion_point(block);
        Ok(Some(b.build_cond_br(cond, then_bb, else_bb)))
    }

    fn parse_switch(&mut self, block: BlockId, scope: &mut FnScope) -> Result<Option<crate::ids::InstId>, ParseError> {
        let (cond, cond_ty) = self.parse_typed_operand(scope)?;
        self.check_int(cond_ty, "switch")?;
        self.expect(TokenKind::Comma)?;
        self.expect_ident("default")?;
        let default_span = self.peek().span;
        let default_label = self.expect_label()?;
        let default_bb = self.target_block(&default_label, default_span, scope)?;
        self.expect(TokenKind::LBracket)?;
        let mut cases = Vec::new();
        if self.peek().kind != TokenKind::RBracket {
            loop {
                let (cval, cval_ty) = self.parse_typed_operand(scope)?;
                self.check_types_match(cval_ty, cond_ty, "switch case")?;
                let cid = match cval {
                    ValueRef::Constant(c) => c,
                    _ => return Err(self.err("switch case must be a constant")),
                };
                self.expect(TokenKind::Comma)?;
                let bspan = self.peek().span;
                let blabel = self.expect_label()?;
                let bb = self.target_block(&blabel, bspan, scope)?;
                cases.push((cid, bb));
                if !self.eat(TokenKind::Pipe) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RBracket)?;
        let mut b = self.builder();
        b.set_insertion_point(block);
        Ok(Some(b.build_switch(cond, default_bb, &cases)))
    }

    fn parse_binop(&mut self, mnemonic: &str, block: BlockId, scope: &mut FnScope) -> Result<crate::ids::InstId, ParseError> {
        let (l, lty) = self.parse_typed_operand(scope)?;
        self.expect(TokenKind::Comma)?;
        let (r, rty) = self.parse_typed_operand(scope)?;
        self.check_types_match(lty, rty, mnemonic)?;
        if matches!(mnemonic, "fadd" | "fsub" | "fmul" | "fdiv") {
            self.check_float(lty, mnemonic)?;
        } else {
            self.check_int(lty, mnemonic)?;
        }
        let mut b = self.builder();
        b.set_insertion_point(block);
        Ok(match mnemonic {
            "add" => b.build_add(l, r, None),
            "sub" => b.build_sub(l, r, None),
            "mul" => b.build_mul(l, r, None),
            "udiv" => b.build_udiv(l, r, None),
            "sdiv" => b.build_sdiv(l, r, None),
            "urem" => b.build_urem(l, r, None),
            "srem" => b.build_srem(l, r, None),
            "shl" => b.build_shl(l, r, None),
            "lshr" => b.build_lshr(l, r, None),
            "ashr" => b.build_ashr(l, r, None),
            "and" => b.build_and(l, r, None),
            "or" => b.build_or(l, r, None),
            "xor" => b.build_xor(l, r, None),
            "fadd" => b.build_fadd(l, r, None),
            "fsub" => b.build_fsub(l, r, None),
            "fmul" => b.build_fmul(l, r, None),
            "fdiv" => b.build_fdiv(l, r, None),
            _ => unreachable!(),
        })
    }

    fn parse_icmp_pred(&mut self) -> Result<ICmpPred, ParseError> {
        let tok = self.advance();
        let TokenKind::Ident(word) = &tok.kind else {
            return Err(ParseError { message: "expected an icmp predicate".into(), span: tok.span });
        };
        Ok(match word.as_str() {
            "eq" => ICmpPred::Eq,
            "ne" => ICmpPred::Ne,
            "sgt" => ICmpPred::Sgt,
            "sge" => ICmpPred::Sge,
            "slt" => ICmpPred::Slt,
            "sle" => ICmpPred::Sle,
            "ugt" => ICmpPred::Ugt,
            "uge" => ICmpPred::Uge,
            "ult" => ICmpPred::Ult,
            "ule" => ICmpPred::Ule,
            other => return Err(ParseError { message: format!("unknown icmp predicate `{other}`"), span: tok.span }),
        })
    }

    fn parse_fcmp_pred(&mut self) -> Result<FCmpPred, ParseError> {
        let tok = self.advance();
        let TokenKind::Ident(word) = &tok.kind else {
            return Err(ParseError { message: "expected an fcmp predicate".into(), span: tok.span });
        };
        Ok(match word.as_str() {
            "oeq" => FCmpPred::Oeq,
            "one" => FCmpPred::One,
            "ogt" => FCmpPred::Ogt,
            "oge" => FCmpPred::Oge,
            "olt" => FCmpPred::Olt,
            "ole" => FCmpPred::Ole,
            "ord" => FCmpPred::Ord,
            "ueq" => FCmpPred::Ueq,
            "une" => FCmpPred::Une,
            "ugt" => FCmpPred::Ugt,
            "uge" => FCmpPred::Uge,
            "ult" => FCmpPred::Ult,
            "ule" => FCmpPred::Ule,
            "uno" => FCmpPred::Uno,
            "true" => FCmpPred::True,
            "false" => FCmpPred::False,
            other => return Err(ParseError { message: format!("unknown fcmp predicate `{other}`"), span: tok.span }),
        })
    }

    fn parse_icmp(&mut self, block: BlockId, scope: &mut FnScope) -> Result<crate::ids::InstId, ParseError> {
        let pred = self.parse_icmp_pred()?;
        let (l, lty) = self.parse_typed_operand(scope)?;
        self.expect(TokenKind::Comma)?;
        let (r, rty) = self.parse_typed_operand(scope)?;
        self.check_types_match(lty, rty, "icmp")?;
        self.check_int(lty, "icmp")?;
        let mut b = self.builder();
        b.set_insertion_point(block);
        Ok(b.build_icmp(pred, l, r, None))
    }

    fn parse_fcmp(&mut self, block: BlockId, scope: &mut FnScope) -> Result<crate::ids::InstId, ParseError> {
        let pred = self.parse_fcmp_pred()?;
        let (l, lty) = self.parse_typed_operand(scope)?;
        self.expect(TokenKind::Comma)?;
        let (r, rty) = self.parse_typed_operand(scope)?;
        self.check_types_match(lty, rty, "fcmp")?;
        self.check_float(lty, "fcmp")?;
        let mut b = self.builder();
        b.set_insertion_point(block);
        Ok(b.build_fcmp(pred, l, r, None))
    }

    fn parse_cast(&mut self, mnemonic: &str, block: BlockId, scope: &mut FnScope) -> Result<crate::ids::InstId, ParseError> {
        let (v, src_ty) = self.parse_typed_operand(scope)?;
        self.expect_ident("to")?;
        let dest = self.parse_type()?;
        match mnemonic {
            "trunc" => {
                let src_bits = self.checked_int_bits(src_ty, "trunc")?;
                let dest_bits = self.checked_int_bits(dest, "trunc")?;
                if dest_bits >= src_bits {
                    return Err(self.err("trunc: destination must be narrower than source"));
                }
            }
            "zext" | "sext" => {
                let src_bits = self.checked_int_bits(src_ty, mnemonic)?;
                let dest_bits = self.checked_int_bits(dest, mnemonic)?;
                if dest_bits <= src_bits {
                    return Err(self.err(format!("{mnemonic}: destination must be wider than source")));
                }
            }
            "ptrtoint" => self.check_pointer(src_ty, "ptrtoint")?,
            "inttoptr" => self.check_pointer(dest, "inttoptr")?,
            "bitcast" => {
                let src_size = self.checked_byte_size(src_ty, "bitcast")?;
                let dest_size = self.checked_byte_size(dest, "bitcast")?;
                if src_size != dest_size {
                    return Err(self.err("bitcast: source and destination sizes must match"));
                }
            }
            _ => {}
        }
        let mut b = self.builder();
        b.set_insertion_point(block);
        Ok(match mnemonic {
            "trunc" => b.build_trunc(v, dest, None),
            "zext" => b.build_zext(v, dest, None),
            "sext" => b.build_sext(v, dest, None),
            "fptrunc" => b.build_fptrunc(v, dest, None),
            "fpext" => b.build_fpext(v, dest, None),
            "fptoui" => b.build_fptoui(v, dest, None),
            "fptosi" => b.build_fptosi(v, dest, None),
            "uitofp" => b.build_uitofp(v, dest, None),
            "sitofp" => b.build_sitofp(v, dest, None),
            "ptrtoint" => b.build_ptrtoint(v, dest, None),
            "inttoptr" => b.build_inttoptr(v, dest, None),
            "bitcast" => b.build_bitcast(v, dest, None),
            _ => unreachable!(),
        })
    }

    fn parse_alloca(&mut self, block: BlockId) -> Result<crate::ids::InstId, ParseError> {
        let ty = self.parse_type()?;
        let mut b = self.builder();
        b.set_insertion_point(block);
        Ok(b.build_alloca(ty, None))
    }

    fn parse_load(&mut self, block: BlockId, scope: &mut FnScope) -> Result<crate::ids::InstId, ParseError> {
        let (ptr, ptr_ty) = self.parse_typed_operand(scope)?;
        self.check_pointer(ptr_ty, "load")?;
        let mut b = self.builder();
        b.set_insertion_point(block);
        Ok(b.build_load(ptr, None))
    }

    fn parse_store(&mut self, block: BlockId, scope: &mut FnScope) -> Result<(), ParseError> {
        let (value, value_ty) = self.parse_typed_operand(scope)?;
        self.expect(TokenKind::Comma)?;
        let (ptr, ptr_ty) = self.parse_typed_operand(scope)?;
        self.check_pointer(ptr_ty, "store")?;
        let pointee = match self.ctx.type_kind(ptr_ty) {
            Type::Pointer(p) => *p,
            _ => unreachable!("checked above"),
        };
        self.check_types_match(value_ty, pointee, "store")?;
        let mut b = self.builder();
        b.set_insertion_point(block);
        b.build_store(value, ptr);
        Ok(())
    }

    fn parse_gep(&mut self, block: BlockId, scope: &mut FnScope) -> Result<crate::ids::InstId, ParseError> {
        let inbounds = self.eat_ident("inbounds");
        let source_ty = self.parse_type()?;
        self.expect(TokenKind::Comma)?;
        let (base, base_ty) = self.parse_typed_operand(scope)?;
        self.check_pointer(base_ty, "gep")?;
        let mut indices = Vec::new();
        while self.eat(TokenKind::Comma) {
            indices.push(self.parse_typed_operand(scope)?);
        }
        let result_elem_ty = self.gep_result_type(source_ty, &indices)?;
        let result_ty = self.ctx.pointer_type(result_elem_ty);
        let index_values: Vec<ValueRef> = indices.iter().map(|(v, _)| *v).collect();
        let mut b = self.builder();
        b.set_insertion_point(block);
        Ok(b.build_gep(source_ty, base, &index_values, result_ty, inbounds, None))
    }

    fn gep_result_type(&mut self, source_ty: TypeId, indices: &[(ValueRef, TypeId)]) -> Result<TypeId, ParseError> {
        let mut cur = source_ty;
        for (n, (value, _)) in indices.iter().enumerate() {
            if n == 0 {
                continue;
            }
            match self.ctx.type_kind(cur).clone() {
                Type::Array(elem, _) => cur = elem,
                Type::AnonStruct(members) => cur = members[self.const_field_index(*value)?],
                Type::NamedStruct { members: Some(members), .. } => cur = members[self.const_field_index(*value)?],
                other => return Err(self.err(format!("gep: cannot index into scalar type {other:?}"))),
            }
        }
        Ok(cur)
    }

    fn const_field_index(&self, value: ValueRef) -> Result<usize, ParseError> {
        match value {
            ValueRef::Constant(c) => match self.ctx.constant(c).kind {
                crate::ir::ConstantKind::Int(n) => Ok(n as usize),
                _ => Err(self.err("gep: struct field index must be a constant integer")),
            },
            _ => Err(self.err("gep: struct field index must be a constant integer")),
        }
    }

    fn parse_phi(&mut self, block: BlockId, ty: TypeId, scope: &mut FnScope) -> Result<crate::ids::InstId, ParseError> {
        let mut b = self.builder();
        b.set_insertion_point(block);
        let phi = b.build_phi(ty, None);
        loop {
            self.expect(TokenKind::LBracket)?;
            let tok = self.advance();
            self.expect(TokenKind::Colon)?;
            let incoming_ty = self.parse_type()?;
            if incoming_ty != ty {
                return Err(self.err("phi incoming value type does not match the phi's declared type"));
            }
            self.expect(TokenKind::Comma)?;
            let from_span = self.peek().span;
            let from_label = self.expect_label()?;
            let from = self.target_block(&from_label, from_span, scope)?;
            self.expect(TokenKind::RBracket)?;

            match &tok.kind {
                TokenKind::Local(name) => match scope.values.get(name).copied() {
                    Some(value) => {
                        self.check_types_match(self.ctx.value_type(value), ty, "phi incoming value")?;
                        let mut b = self.builder();
                        b.add_incoming(phi, value, from);
                    }
                    None => scope.pending.push(PendingIncoming { phi, name: name.clone(), ty, from, span: tok.span }),
                },
                _ => {
                    let value = self.resolve_value_token(&tok, ty, scope)?;
                    let mut b = self.builder();
                    b.add_incoming(phi, value, from);
                }
            }

            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        Ok(phi)
    }

    fn parse_select(&mut self, block: BlockId, scope: &mut FnScope) -> Result<crate::ids::InstId, ParseError> {
        let (cond, cond_ty) = self.parse_typed_operand(scope)?;
        self.check_i1(cond_ty, "select")?;
        self.expect(TokenKind::Comma)?;
        let (t, t_ty) = self.parse_typed_operand(scope)?;
        self.expect(TokenKind::Comma)?;
        let (f, f_ty) = self.parse_typed_operand(scope)?;
        self.check_types_match(t_ty, f_ty, "select")?;
        let mut b = self.builder();
        b.set_insertion_point(block);
        Ok(b.build_select(cond, t, f, None))
    }

    fn checked_callee_fn_type(&self, callee: ValueRef) -> Result<TypeId, ParseError> {
        match callee {
            ValueRef::Function(f) => Ok(self.ctx.func(f).fn_ty),
            _ => match self.ctx.type_kind(self.ctx.value_type(callee)) {
                Type::Pointer(pointee) => Ok(*pointee),
                _ => Err(self.err("call: callee must be a pointer to function")),
            },
        }
    }

    fn parse_call(&mut self, block: BlockId, scope: &mut FnScope) -> Result<crate::ids::InstId, ParseError> {
        let callee_tok = self.advance();
        let callee = match &callee_tok.kind {
            TokenKind::Global(name) => self.resolve_global_value(name, callee_tok.span)?,
            TokenKind::Local(name) => scope
                .values
                .get(name)
                .copied()
                .ok_or_else(|| ParseError { message: format!("use of undefined value `%{name}`"), span: callee_tok.span })?,
            other => return Err(ParseError { message: format!("expected a call target, found `{}`", other.describe()), span: callee_tok.span }),
        };
        let fn_ty = self.checked_callee_fn_type(callee)?;
        let (params, is_variadic) = match self.ctx.type_kind(fn_ty).clone() {
            Type::Function { params, is_variadic, .. } => (params, is_variadic),
            _ => return Err(self.err("call: callee must be a pointer to function")),
        };
        self.expect(TokenKind::LParen)?;
        let mut args = Vec::new();
        let mut arg_tys = Vec::new();
        if self.peek().kind != TokenKind::RParen {
            loop {
                let (v, ty) = self.parse_typed_operand(scope)?;
                args.push(v);
                arg_tys.push(ty);
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen)?;
        if !(args.len() == params.len() || (is_variadic && args.len() >= params.len())) {
            return Err(self.err("call: argument count does not match function arity"));
        }
        for (actual, expected) in arg_tys.iter().zip(params.iter()) {
            self.check_types_match(*actual, *expected, "call argument")?;
        }
        let mut b = self.builder();
        b.set_insertion_point(block);
        Ok(b.build_call(callee, &args, None))
    }

    // ---- types -----------------------------------------------------------------

    fn parse_type(&mut self) -> Result<TypeId, ParseError> {
        let base = self.parse_type_atom()?;
        if self.peek().kind == TokenKind::LParen {
            let (params, _, variadic) = self.parse_param_list(false)?;
            Ok(self.ctx.function_type(base, params, variadic))
        } else {
            Ok(base)
        }
    }

    fn parse_type_atom(&mut self) -> Result<TypeId, ParseError> {
        let tok = self.advance();
        match tok.kind {
            TokenKind::Ident(word) => match word.as_str() {
                "void" => Ok(self.ctx.void_ty),
                "i1" => Ok(self.ctx.i1_ty),
                "i8" => Ok(self.ctx.i8_ty),
                "i16" => Ok(self.ctx.i16_ty),
                "i32" => Ok(self.ctx.i32_ty),
                "i64" => Ok(self.ctx.i64_ty),
                "f32" => Ok(self.ctx.f32_ty),
                "f64" => Ok(self.ctx.f64_ty),
                other => Err(ParseError { message: format!("unknown type `{other}`"), span: tok.span }),
            },
            TokenKind::Local(name) => {
                let sym = self.ctx.intern(&name);
                Ok(self.ctx.named_struct(sym))
            }
            TokenKind::Lt => {
                let pointee = self.parse_type()?;
                self.expect(TokenKind::Gt)?;
                Ok(self.ctx.pointer_type(pointee))
            }
            TokenKind::LBracket => {
                let count_tok = self.advance();
                let TokenKind::Int(count) = count_tok.kind else {
                    return Err(ParseError { message: "expected an array length".into(), span: count_tok.span });
                };
                self.expect_ident("x")?;
                let elem = self.parse_type()?;
                self.expect(TokenKind::RBracket)?;
                Ok(self.ctx.array_type(elem, count))
            }
            TokenKind::LBrace => {
                let mut members = Vec::new();
                if self.peek().kind != TokenKind::RBrace {
                    loop {
                        members.push(self.parse_type()?);
                        if !self.eat(TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(TokenKind::RBrace)?;
                Ok(self.ctx.anon_struct_type(members))
            }
            other => Err(ParseError { message: format!("expected a type, found `{}`", other.describe()), span: tok.span }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_addition_function() {
        let mut ctx = Context::new();
        let src = "define i32 @add(i32 %a, i32 %b) {\n$entry:\n  %s: i32 = add %a: i32, %b: i32\n  ret %s: i32\n}\n";
        let module = parse_module(&mut ctx, src, 0).expect("parses");
        assert_eq!(ctx.module(module).functions.len(), 1);
        let f = ctx.module(module).functions[0];
        assert_eq!(ctx.func(f).blocks.len(), 1);
        let errors = crate::verify::verify_function(&ctx, f);
        assert_eq!(errors, Vec::new());
    }

    #[test]
    fn parses_diamond_with_phi() {
        let mut ctx = Context::new();
        let src = "\
define i32 @pick(i1 %c) {\n\
$entry:\n\
  cond_br %c: i1, $then, $else\n\
$then:\n\
  br $merge\n\
$else:\n\
  br $merge\n\
$merge:\n\
  %v: i32 = phi [ 1: i32, $then ], [ 2: i32, $else ]\n\
  ret %v: i32\n\
}\n";
        let module = parse_module(&mut ctx, src, 0).expect("parses");
        let f = ctx.module(module).functions[0];
        let errors = crate::verify::verify_function(&ctx, f);
        assert_eq!(errors, Vec::new());
    }

    #[test]
    fn parses_loop_with_forward_referenced_phi_edge() {
        let mut ctx = Context::new();
        let src = "\
define i32 @sum(i32 %n) {\n\
$entry:\n\
  br $header\n\
$header:\n\
  %i: i32 = phi [ 0: i32, $entry ], [ %i_next: i32, $body ]\n\
  %done: i1 = icmp sge %i: i32, %n: i32\n\
  cond_br %done: i1, $exit, $body\n\
$body:\n\
  %i_next: i32 = add %i: i32, 1: i32\n\
  br $header\n\
$exit:\n\
  ret %i: i32\n\
}\n";
        let module = parse_module(&mut ctx, src, 0).expect("parses");
        let f = ctx.module(module).functions[0];
        let errors = crate::verify::verify_function(&ctx, f);
        assert_eq!(errors, Vec::new());
    }

    #[test]
    fn reports_error_on_unknown_opcode() {
        let mut ctx = Context::new();
        let src = "define void @f() {\n$entry:\n  frobnicate\n}\n";
        let err = parse_module(&mut ctx, src, 0).unwrap_err();
        assert!(err.message.contains("frobnicate"));
    }

    #[test]
    fn reports_error_on_branch_to_undeclared_block() {
        let mut ctx = Context::new();
        let src = "define void @f() {\n$entry:\n  br $nowhere\n}\n";
        let err = parse_module(&mut ctx, src, 0).unwrap_err();
        assert!(err.message.contains("nowhere"));
    }
}
