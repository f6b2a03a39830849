#![allow(dead_code)]

use std::io::Cursor;
use anyhow::{anyhow, Result};
use duke::analysis::hierarchy::KnownHierarchy;
use duke::class_constants::access;
use duke::tree::class::ClassFile;
use duke::tree::field::FieldRef;
use duke::tree::method::code::{Code, Exception, Instruction, Invoke, InvokeKind, Loadable, LvIndex};
use duke::tree::method::instruction_list::InstructionList;
use duke::tree::method::{Method, MethodRef};
use duke::tree::version::Version;
use duke::WriteOptions;
use overclock::Event;

pub const SERVER: &str = "net/minecraft/server/MinecraftServer";
pub const CLIENT: &str = "net/minecraft/client/Minecraft";
pub const HELPER: &str = "com/microsoft/Malmo/Utils/TimeHelper";

pub const GUI: &str = "net/minecraft/client/gui/Gui";
pub const MENU: &str = "net/minecraft/client/gui/GuiMainMenu";
pub const HUD: &str = "net/minecraft/client/gui/GuiIngame";

pub fn write(class: &ClassFile) -> Result<Vec<u8>> {
	let mut bytes = Vec::new();
	duke::write_class(&mut bytes, class)?;
	Ok(bytes)
}

/// Writes with a hierarchy that knows the screens of the client.
pub fn write_knowing_screens(class: &ClassFile) -> Result<Vec<u8>> {
	let mut hierarchy = KnownHierarchy::default();
	hierarchy.insert(GUI, Some("java/lang/Object".to_owned()), false);
	hierarchy.insert(MENU, Some(GUI.to_owned()), false);
	hierarchy.insert(HUD, Some(GUI.to_owned()), false);

	let mut bytes = Vec::new();
	duke::write_class_with(&mut bytes, class, &WriteOptions::new(&hierarchy))?;
	Ok(bytes)
}

pub fn read(bytes: &[u8]) -> Result<ClassFile> {
	duke::read_class(&mut Cursor::new(bytes))
}

pub fn instructions(class: &ClassFile, name: &str, descriptor: &str) -> Result<Vec<Instruction>> {
	let code = class.method(name, descriptor)
		.and_then(|method| method.code.as_ref())
		.ok_or_else(|| anyhow!("no code for {name}{descriptor} in {}", class.name))?;
	Ok(code.instructions().iter().map(|(_, instruction)| instruction.clone()).collect())
}

fn constructor() -> Method {
	let mut list = InstructionList::new();
	list.push_back(Instruction::ALoad(LvIndex { index: 0 }));
	list.push_back(Instruction::Invoke(Invoke::new(InvokeKind::Special, MethodRef::new("java/lang/Object", "<init>", "()V"))));
	list.push_back(Instruction::Return);
	let mut method = Method::new(access::PUBLIC, "<init>", "()V");
	method.code = Some(Code::new(list));
	method
}

/// The tick loop of the server, with `literals` loads of `50L` (at least one) in `run`.
///
/// ```text
/// run:
///     ldc2_w 50L
///     lstore_1
/// loop:
///     lload_1
///     ldc2_w 50L        (literals - 1 times, each followed by ladd)
///     ladd
///     lstore_1
///     ldc 50
///     pop
///     lload_1
///     ldc2_w 1000L
///     lcmp
///     iflt loop
///     return
/// ```
pub fn server_class(name: &str, literals: usize) -> Result<ClassFile> {
	let mut class = ClassFile::new(Version::V1_8, access::PUBLIC | access::SUPER, name, Some("java/lang/Object".to_owned()));
	class.methods.push(constructor());

	let mut list = InstructionList::new();
	let head = list.new_label();
	if literals > 0 {
		list.push_back(Instruction::Ldc(Loadable::Long(50)));
	} else {
		list.push_back(Instruction::LConst0);
	}
	list.push_back(Instruction::LStore(LvIndex { index: 1 }));
	let first = list.push_back(Instruction::LLoad(LvIndex { index: 1 }));
	for _ in 1..literals {
		list.push_back(Instruction::Ldc(Loadable::Long(50)));
		list.push_back(Instruction::LAdd);
	}
	list.push_back(Instruction::LStore(LvIndex { index: 1 }));
	list.push_back(Instruction::Ldc(Loadable::Integer(50)));
	list.push_back(Instruction::Pop);
	list.push_back(Instruction::LLoad(LvIndex { index: 1 }));
	list.push_back(Instruction::Ldc(Loadable::Long(1000)));
	list.push_back(Instruction::LCmp);
	list.push_back(Instruction::IfLt(head));
	list.push_back(Instruction::Return);
	list.bind_label(head, first)?;

	let mut run = Method::new(access::PUBLIC, "run", "()V");
	run.code = Some(Code::new(list));
	class.methods.push(run);

	// same literal, other method
	let mut list = InstructionList::new();
	list.push_back(Instruction::Ldc(Loadable::Long(50)));
	list.push_back(Instruction::LReturn);
	let mut other = Method::new(access::PUBLIC | access::STATIC, "tickLength", "()J");
	other.code = Some(Code::new(list));
	class.methods.push(other);

	Ok(class)
}

/// The game loop of the client, calling `update` on `this`, guarded by an exception handler.
///
/// ```text
/// game_loop:
/// start:
///     aload_0
///     invokevirtual name.update()V
///     aload_0
///     invokevirtual name.tick()V
/// end:
///     return
/// handler:
///     pop
///     return
/// ```
pub fn client_class(name: &str, game_loop: &str, update: &str) -> Result<ClassFile> {
	let mut class = ClassFile::new(Version::V1_8, access::PUBLIC | access::SUPER, name, Some("java/lang/Object".to_owned()));
	class.methods.push(constructor());

	let mut list = InstructionList::new();
	let start = list.new_label();
	let end = list.new_label();
	let handler = list.new_label();

	let first = list.push_back(Instruction::ALoad(LvIndex { index: 0 }));
	list.push_back(Instruction::Invoke(Invoke::new(InvokeKind::Virtual, MethodRef::new(name, update, "()V"))));
	list.push_back(Instruction::ALoad(LvIndex { index: 0 }));
	list.push_back(Instruction::Invoke(Invoke::new(InvokeKind::Virtual, MethodRef::new(name, "tick", "()V"))));
	let ret = list.push_back(Instruction::Return);
	let pop = list.push_back(Instruction::Pop);
	list.push_back(Instruction::Return);
	list.bind_label(start, first)?;
	list.bind_label(end, ret)?;
	list.bind_label(handler, pop)?;

	let mut code = Code::new(list);
	code.exception_table_mut().push(Exception {
		start,
		end,
		handler,
		catch: Some("java/lang/Exception".to_owned()),
	});
	let mut method = Method::new(access::PUBLIC, game_loop, "()V");
	method.code = Some(code);
	class.methods.push(method);

	for (method_name, body) in [(update, Instruction::Return), ("tick", Instruction::Return)] {
		let mut list = InstructionList::new();
		list.push_back(body);
		let mut method = Method::new(access::PUBLIC, method_name, "()V");
		method.code = Some(Code::new(list));
		class.methods.push(method);
	}

	Ok(class)
}

/// The game loop of a client drawing one of two screens, which only meet at their common super class [`GUI`].
///
/// ```text
/// game_loop:
///     aload_0
///     invokevirtual name.update()V
///     aload_0
///     getfield name.inMenu Z
///     ifeq hud
///     getstatic name.menu LGuiMainMenu;
///     goto draw
/// hud:
///     getstatic name.hud LGuiIngame;
/// draw:
///     invokevirtual Gui.draw()V
///     return
/// ```
pub fn screen_client_class(name: &str, version: Version, game_loop: &str, update: &str) -> Result<ClassFile> {
	let mut class = ClassFile::new(version, access::PUBLIC | access::SUPER, name, Some("java/lang/Object".to_owned()));
	class.methods.push(constructor());

	let mut list = InstructionList::new();
	let hud = list.new_label();
	let draw = list.new_label();

	list.push_back(Instruction::ALoad(LvIndex { index: 0 }));
	list.push_back(Instruction::Invoke(Invoke::new(InvokeKind::Virtual, MethodRef::new(name, update, "()V"))));
	list.push_back(Instruction::ALoad(LvIndex { index: 0 }));
	list.push_back(Instruction::GetField(FieldRef::new(name, "inMenu", "Z")));
	list.push_back(Instruction::IfEq(hud));
	list.push_back(Instruction::GetStatic(FieldRef::new(name, "menu", &format!("L{MENU};"))));
	list.push_back(Instruction::Goto(draw));
	let get_hud = list.push_back(Instruction::GetStatic(FieldRef::new(name, "hud", &format!("L{HUD};"))));
	let invoke = list.push_back(Instruction::Invoke(Invoke::new(InvokeKind::Virtual, MethodRef::new(GUI, "draw", "()V"))));
	list.push_back(Instruction::Return);
	list.bind_label(hud, get_hud)?;
	list.bind_label(draw, invoke)?;

	let mut method = Method::new(access::PUBLIC, game_loop, "()V");
	method.code = Some(Code::new(list));
	class.methods.push(method);

	let mut list = InstructionList::new();
	list.push_back(Instruction::Return);
	let mut method = Method::new(access::PUBLIC, update, "()V");
	method.code = Some(Code::new(list));
	class.methods.push(method);

	Ok(class)
}

pub fn is_failure(event: &Event) -> bool {
	matches!(event, Event::Failed { .. })
}
