//! Pretty-printer for the textual IR (spec §6, §8 "verifier round-trip").
//!
//! `parse_module(&print_module(ctx, m)) -> same structural shape`, up to
//! synthesized value names for anything the original had no name for.

use std::collections::HashSet;
use std::fmt::Write as _;

use crate::context::Context;
use crate::ids::{FuncId, GlobalId, InstId, ModuleId, Sym, TypeId};
use crate::ir::instruction::{FCmpPred, ICmpPred};
use crate::ir::ConstantKind;
use crate::types::{FloatWidth, IntWidth, Type};
use crate::value::ValueRef;

pub fn print_module(ctx: &Context, module: ModuleId) -> String {
    let mut out = String::new();
    let m = ctx.module(module);
    if let Some(name) = &m.name {
        let _ = writeln!(out, "module {name}\n");
    }

    let structs = collect_named_structs(ctx, module);
    for (ty, name) in &structs {
        let members = match ctx.type_kind(*ty) {
            Type::NamedStruct { members: Some(members), .. } => members.clone(),
            _ => continue,
        };
        let fields: Vec<String> = members.iter().map(|m| print_type(ctx, *m)).collect();
        let _ = writeln!(out, "{} = type {{ {} }}", print_sym(ctx, *name, "%"), fields.join(", "));
    }
    if !structs.is_empty() {
        out.push('\n');
    }

    for &g in &m.globals {
        out.push_str(&print_global(ctx, g));
        out.push('\n');
    }
    if !m.globals.is_empty() {
        out.push('\n');
    }

    for (i, &f) in m.functions.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(&print_function(ctx, f));
    }
    out
}

fn print_sym(ctx: &Context, sym: Sym, sigil: &str) -> String {
    format!("{sigil}{}", ctx.resolve(sym))
}

fn print_global(ctx: &Context, g: GlobalId) -> String {
    let global = ctx.global(g);
    let ty_str = print_type(ctx, global.allocated_ty);
    let init_str = match global.init {
        None => "zeroinitializer".to_string(),
        Some(c) => format!("{}: {}", const_literal(ctx, c, global.allocated_ty), ty_str),
    };
    format!("{}: {} = global {}", print_sym(ctx, global.name, "@"), ty_str, init_str)
}

fn print_function(ctx: &Context, f: FuncId) -> String {
    let func = ctx.func(f);
    let ret = print_type(ctx, func.ret_ty);
    let Type::Function { params, is_variadic, .. } = ctx.type_kind(func.fn_ty).clone() else {
        unreachable!("a function's fn_ty is always Type::Function");
    };

    if func.is_declaration {
        let mut parts: Vec<String> = params.iter().map(|p| print_type(ctx, *p)).collect();
        if is_variadic {
            parts.push("...".to_string());
        }
        return format!("declare {} {}({})\n", ret, print_sym(ctx, func.name, "@"), parts.join(", "));
    }

    let mut parts = Vec::new();
    for &arg in &func.args {
        let a = ctx.arg(arg);
        let name = a.name.map(|s| print_sym(ctx, s, "%")).unwrap_or_else(|| format!("%arg{}", a.index));
        parts.push(format!("{} {}", print_type(ctx, a.ty), name));
    }
    if is_variadic {
        parts.push("...".to_string());
    }

    let mut out = format!("define {} {}({}) {{\n", ret, print_sym(ctx, func.name, "@"), parts.join(", "));
    for &block in &func.blocks {
        let label = ctx.block(block).name.map(|s| ctx.resolve(s).to_string()).unwrap_or_else(|| format!("b{}", block.index()));
        let _ = writeln!(out, "${label}:");
        for inst in ctx.block_insts(block) {
            let _ = writeln!(out, "  {}", print_instruction(ctx, inst));
        }
    }
    out.push_str("}\n");
    out
}

fn value_name(ctx: &Context, v: ValueRef) -> String {
    match v {
        ValueRef::Argument(a) => {
            let arg = ctx.arg(a);
            arg.name.map(|s| print_sym(ctx, s, "%")).unwrap_or_else(|| format!("%arg{}", arg.index))
        }
        ValueRef::Instruction(i) => {
            let inst = ctx.inst(i);
            inst.name.map(|s| print_sym(ctx, s, "%")).unwrap_or_else(|| format!("%v{}", i.index()))
        }
        ValueRef::Block(b) => ctx.block(b).name.map(|s| print_sym(ctx, s, "$")).unwrap_or_else(|| format!("${}", b.index())),
        ValueRef::Function(f) => print_sym(ctx, ctx.func(f).name, "@"),
        ValueRef::Constant(c) => const_literal(ctx, c, ctx.constant(c).ty),
        ValueRef::Global(g) => print_sym(ctx, ctx.global(g).name, "@"),
    }
}

fn typed_operand(ctx: &Context, v: ValueRef) -> String {
    format!("{}: {}", value_name(ctx, v), print_type(ctx, ctx.value_type(v)))
}

fn const_literal(ctx: &Context, c: crate::ids::ConstId, ty: TypeId) -> String {
    match ctx.constant(c).kind {
        ConstantKind::Undef => "undef".to_string(),
        ConstantKind::Int(n) => n.to_string(),
        ConstantKind::Float(bits) => match ctx.type_kind(ty) {
            Type::Float(FloatWidth::F32) => format_float(f32::from_bits(bits as u32) as f64),
            Type::Float(FloatWidth::F64) => format_float(f64::from_bits(bits)),
            _ => unreachable!("a float constant always has a float type"),
        },
    }
}

/// Always includes a decimal point so the lexer re-tokenizes this as a
/// float literal, not an integer, on the way back in.
fn format_float(v: f64) -> String {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{v:.1}")
    } else {
        format!("{v}")
    }
}

pub fn print_type(ctx: &Context, ty: TypeId) -> String {
    match ctx.type_kind(ty).clone() {
        Type::Void => "void".to_string(),
        Type::Int(IntWidth::I1) => "i1".to_string(),
        Type::Int(IntWidth::I8) => "i8".to_string(),
        Type::Int(IntWidth::I16) => "i16".to_string(),
        Type::Int(IntWidth::I32) => "i32".to_string(),
        Type::Int(IntWidth::I64) => "i64".to_string(),
        Type::Float(FloatWidth::F32) => "f32".to_string(),
        Type::Float(FloatWidth::F64) => "f64".to_string(),
        Type::Label => "label".to_string(),
        Type::Pointer(inner) => format!("<{}>", print_type(ctx, inner)),
        Type::Array(elem, n) => format!("[{} x {}]", n, print_type(ctx, elem)),
        Type::AnonStruct(members) => {
            let fields: Vec<String> = members.iter().map(|m| print_type(ctx, *m)).collect();
            format!("{{ {} }}", fields.join(", "))
        }
        Type::NamedStruct { name, .. } => print_sym(ctx, name, "%"),
        Type::Function { ret, params, is_variadic } => {
            let mut parts: Vec<String> = params.iter().map(|p| print_type(ctx, *p)).collect();
            if is_variadic {
                parts.push("...".to_string());
            }
            format!("{}({})", print_type(ctx, ret), parts.join(", "))
        }
    }
}

fn print_instruction(ctx: &Context, inst: InstId) -> String {
    use crate::ir::Opcode;
    let data = ctx.inst(inst);
    let opcode = data.opcode;
    let result_prefix = if opcode.has_result() {
        format!("{}: {} = ", value_name(ctx, ValueRef::Instruction(inst)), print_type(ctx, data.result_ty.unwrap()))
    } else {
        String::new()
    };

    let operand = |i: usize| typed_operand(ctx, ctx.operand_value(inst, i));

    let body = match opcode {
        Opcode::Ret => {
            if data.operands.is_empty() {
                "ret".to_string()
            } else {
                format!("ret {}", operand(0))
            }
        }
        Opcode::Br => {
            let target = ctx.operand_value(inst, 0).as_block().expect("br target is a block");
            format!("br {}", value_name(ctx, ValueRef::Block(target)))
        }
        Opcode::CondBr => {
            let then_bb = ctx.operand_value(inst, 1).as_block().expect("cond_br then is a block");
            let else_bb = ctx.operand_value(inst, 2).as_block().expect("cond_br else is a block");
            format!("cond_br {}, {}, {}", operand(0), value_name(ctx, ValueRef::Block(then_bb)), value_name(ctx, ValueRef::Block(else_bb)))
        }
        Opcode::Switch => {
            let default = ctx.switch_default(inst);
            let cases = ctx.switch_cases(inst);
            let case_strs: Vec<String> = cases
                .iter()
                .map(|&(c, b)| {
                    let ty = ctx.constant(c).ty;
                    format!("{}: {}, {}", const_literal(ctx, c, ty), print_type(ctx, ty), value_name(ctx, ValueRef::Block(b)))
                })
                .collect();
            format!("switch {}, default {} [ {} ]", operand(0), value_name(ctx, ValueRef::Block(default)), case_strs.join(" | "))
        }
        Opcode::Add
        | Opcode::Sub
        | Opcode::Mul
        | Opcode::UDiv
        | Opcode::SDiv
        | Opcode::URem
        | Opcode::SRem
        | Opcode::Shl
        | Opcode::LShr
        | Opcode::AShr
        | Opcode::And
        | Opcode::Or
        | Opcode::Xor
        | Opcode::FAdd
        | Opcode::FSub
        | Opcode::FMul
        | Opcode::FDiv => format!("{} {}, {}", opcode.mnemonic(), operand(0), operand(1)),
        Opcode::ICmp => format!("icmp {} {}, {}", icmp_pred_str(data.icmp_pred()), operand(0), operand(1)),
        Opcode::FCmp => format!("fcmp {} {}, {}", fcmp_pred_str(data.fcmp_pred()), operand(0), operand(1)),
        Opcode::Trunc
        | Opcode::ZExt
        | Opcode::SExt
        | Opcode::FpTrunc
        | Opcode::FpExt
        | Opcode::FpToUi
        | Opcode::FpToSi
        | Opcode::UiToFp
        | Opcode::SiToFp
        | Opcode::PtrToInt
        | Opcode::IntToPtr
        | Opcode::BitCast => format!("{} {} to {}", opcode.mnemonic(), operand(0), print_type(ctx, data.result_ty.unwrap())),
        Opcode::Alloca => format!("alloca {}", print_type(ctx, data.alloca_ty())),
        Opcode::Load => format!("load {}", operand(0)),
        Opcode::Store => format!("store {}, {}", operand(0), operand(1)),
        Opcode::Gep => {
            let source_ty = data.gep_source_ty();
            let inbounds = if data.gep_inbounds() { "inbounds " } else { "" };
            let indices: Vec<String> = (1..data.operands.len()).map(operand).collect();
            let mut parts = vec![format!("{}{}", inbounds, print_type(ctx, source_ty)), operand(0)];
            parts.extend(indices);
            format!("gep {}", parts.join(", "))
        }
        Opcode::Phi => {
            let incoming = ctx.phi_incoming(inst);
            let ty = data.result_ty.unwrap();
            let pairs: Vec<String> = incoming
                .iter()
                .map(|&(v, b)| format!("[ {}: {}, {} ]", value_name(ctx, v), print_type(ctx, ty), value_name(ctx, ValueRef::Block(b))))
                .collect();
            format!("phi {}", pairs.join(", "))
        }
        Opcode::Select => format!("select {}, {}, {}", operand(0), operand(1), operand(2)),
        Opcode::Call => {
            let callee = ctx.operand_value(inst, 0);
            let args: Vec<String> = (1..data.operands.len()).map(operand).collect();
            format!("call {}({})", value_name(ctx, callee), args.join(", "))
        }
    };
    format!("{result_prefix}{body}")
}

fn icmp_pred_str(p: ICmpPred) -> &'static str {
    match p {
        ICmpPred::Eq => "eq",
        ICmpPred::Ne => "ne",
        ICmpPred::Sgt => "sgt",
        ICmpPred::Sge => "sge",
        ICmpPred::Slt => "slt",
        ICmpPred::Sle => "sle",
        ICmpPred::Ugt => "ugt",
        ICmpPred::Uge => "uge",
        ICmpPred::Ult => "ult",
        ICmpPred::Ule => "ule",
    }
}

fn fcmp_pred_str(p: FCmpPred) -> &'static str {
    match p {
        FCmpPred::Oeq => "oeq",
        FCmpPred::One => "one",
        FCmpPred::Ogt => "ogt",
        FCmpPred::Oge => "oge",
        FCmpPred::Olt => "olt",
        FCmpPred::Ole => "ole",
        FCmpPred::Ord => "ord",
        FCmpPred::Ueq => "ueq",
        FCmpPred::Une => "une",
        FCmpPred::Ugt => "ugt",
        FCmpPred::Uge => "uge",
        FCmpPred::Ult => "ult",
        FCmpPred::Ule => "ule",
        FCmpPred::Uno => "uno",
        FCmpPred::True => "true",
        FCmpPred::False => "false",
    }
}

/// Named struct types reachable from `module`'s globals and functions, in
/// first-encountered order — that's the order the printer emits `type`
/// definitions in, and forward references within bodies are fine since the
/// parser interns named structs lazily.
fn collect_named_structs(ctx: &Context, module: ModuleId) -> Vec<(TypeId, Sym)> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    let m = ctx.module(module);
    for &g in &m.globals {
        visit_type(ctx, ctx.global(g).allocated_ty, &mut seen, &mut out);
    }
    for &f in &m.functions {
        let func = ctx.func(f);
        visit_type(ctx, func.ret_ty, &mut seen, &mut out);
        for &arg in &func.args {
            visit_type(ctx, ctx.arg(arg).ty, &mut seen, &mut out);
        }
        for &block in &func.blocks {
            for inst in ctx.block_insts(block) {
                let data = ctx.inst(inst);
                if let Some(ty) = data.result_ty {
                    visit_type(ctx, ty, &mut seen, &mut out);
                }
                if data.opcode == crate::ir::Opcode::Alloca {
                    visit_type(ctx, data.alloca_ty(), &mut seen, &mut out);
                }
                if data.opcode == crate::ir::Opcode::Gep {
                    visit_type(ctx, data.gep_source_ty(), &mut seen, &mut out);
                }
            }
        }
    }
    out
}

fn visit_type(ctx: &Context, ty: TypeId, seen: &mut HashSet<TypeId>, out: &mut Vec<(TypeId, Sym)>) {
    if !seen.insert(ty) {
        return;
    }
    match ctx.type_kind(ty).clone() {
        Type::NamedStruct { name, members } => {
            out.push((ty, name));
            if let Some(members) = members {
                for m in members {
                    visit_type(ctx, m, seen, out);
                }
            }
        }
        Type::Pointer(inner) => visit_type(ctx, inner, seen, out),
        Type::Array(elem, _) => visit_type(ctx, elem, seen, out),
        Type::AnonStruct(members) => {
            for m in members {
                visit_type(ctx, m, seen, out);
            }
        }
        Type::Function { ret, params, .. } => {
            visit_type(ctx, ret, seen, out);
            for p in params {
                visit_type(ctx, p, seen, out);
            }
        }
        Type::Void | Type::Int(_) | Type::Float(_) | Type::Label => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;
    use crate::context::Context;
    use crate::text::parser::parse_module;

    #[test]
    fn prints_and_reparses_an_addition_function() {
        let mut ctx = Context::new();
        let m = ctx.new_module(None);
        let name = ctx.intern("add");
        let i32_ty = ctx.i32_ty;
        let a_sym = ctx.intern("a");
        let b_sym = ctx.intern("b");
        let f = ctx.new_function(m, name, i32_ty, &[i32_ty, i32_ty], &[Some(a_sym), Some(b_sym)], false, false);
        let entry = ctx.append_block(f, None);
        let a = ValueRef::Argument(ctx.func(f).args[0]);
        let b_arg = ValueRef::Argument(ctx.func(f).args[1]);
        let mut b = Builder::new(&mut ctx);
        b.set_insertion_point(entry);
        let sum = b.build_add(a, b_arg, None);
        b.build_ret(Some(ValueRef::Instruction(sum)));

        let text = print_module(&ctx, m);
        assert!(text.contains("define i32 @add"));

        let mut ctx2 = Context::new();
        let reparsed = parse_module(&mut ctx2, &text, 0).expect("printer output reparses");
        assert_eq!(ctx2.module(reparsed).functions.len(), 1);
        let f2 = ctx2.module(reparsed).functions[0];
        assert_eq!(crate::verify::verify_function(&ctx2, f2), Vec::new());
    }

    #[test]
    fn prints_a_named_struct_type() {
        let mut ctx = Context::new();
        let m = ctx.new_module(None);
        let sym = ctx.intern("Point");
        let st = ctx.named_struct(sym);
        let i32_ty = ctx.i32_ty;
        ctx.define_named_struct_body(st, vec![i32_ty, i32_ty]);
        let gsym = ctx.intern("origin");
        ctx.new_global(m, gsym, st, None);

        let text = print_module(&ctx, m);
        assert!(text.contains("%Point = type { i32, i32 }"));
        assert!(text.contains("@origin: %Point = global zeroinitializer"));
    }
}
