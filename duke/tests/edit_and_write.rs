use std::io::Cursor;
use anyhow::Result;
use pretty_assertions::assert_eq;
use duke::class_constants::access;
use duke::tree::class::ClassFile;
use duke::tree::field::{Field, FieldRef};
use duke::tree::method::code::{Code, Exception, Instruction, Invoke, InvokeKind, Label, Loadable, LvIndex};
use duke::tree::method::instruction_list::InstructionList;
use duke::tree::method::{Method, MethodRef};
use duke::tree::version::Version;

fn write(class: &ClassFile) -> Result<Vec<u8>> {
	let mut bytes = Vec::new();
	duke::write_class(&mut bytes, class)?;
	Ok(bytes)
}

fn read(bytes: Vec<u8>) -> Result<ClassFile> {
	duke::read_class(&mut Cursor::new(bytes))
}

fn instructions(class: &ClassFile, name: &str) -> Vec<Instruction> {
	class.methods.iter()
		.filter(|method| method.name == name)
		.filter_map(|method| method.code.as_ref())
		.flat_map(|code| code.instructions().iter().map(|(_, instruction)| instruction.clone()))
		.collect()
}

fn position(list: &InstructionList, label: Label) -> Option<usize> {
	list.iter().position(|(id, _)| list.labels(id).is_some_and(|labels| labels.contains(&label)))
}

fn game_class() -> ClassFile {
	let mut class = ClassFile::new(Version::V1_8, access::PUBLIC | access::SUPER, "a/Game", Some("java/lang/Object".to_owned()));
	class.fields.push(Field::new(access::PRIVATE, "running", "Z"));

	let mut init = InstructionList::new();
	init.push_back(Instruction::ALoad(LvIndex { index: 0 }));
	init.push_back(Instruction::Invoke(Invoke::new(InvokeKind::Special, MethodRef::new("java/lang/Object", "<init>", "()V"))));
	init.push_back(Instruction::Return);
	let mut method = Method::new(access::PUBLIC, "<init>", "()V");
	method.code = Some(Code::new(init));
	class.methods.push(method);

	let mut run = InstructionList::new();
	run.push_back(Instruction::ALoad(LvIndex { index: 0 }));
	run.push_back(Instruction::Invoke(Invoke::new(InvokeKind::Virtual, MethodRef::new("a/Game", "updateDisplay", "()V"))));
	run.push_back(Instruction::Ldc(Loadable::Long(50)));
	run.push_back(Instruction::LStore(LvIndex { index: 1 }));
	run.push_back(Instruction::Return);
	let mut method = Method::new(access::PUBLIC, "run", "()V");
	method.code = Some(Code::new(run));
	class.methods.push(method);

	class
}

#[test]
fn written_classes_read_back() -> Result<()> {
	let class = game_class();
	let read = read(write(&class)?)?;

	assert_eq!(read.name, "a/Game");
	assert_eq!(read.super_class.as_deref(), Some("java/lang/Object"));
	assert_eq!(read.version, Version::V1_8);
	assert_eq!(read.fields, class.fields);
	assert_eq!(instructions(&read, "run"), instructions(&class, "run"));
	assert_eq!(instructions(&read, "<init>"), instructions(&class, "<init>"));

	let run = read.method("run", "()V").and_then(|method| method.code.as_ref());
	assert_eq!(run.map(|code| (code.max_stack(), code.max_locals())), Some((2, 3)));
	assert!(run.is_some_and(|code| !code.is_modified()));
	Ok(())
}

#[test]
fn writing_a_read_class_again_changes_nothing() -> Result<()> {
	let first = write(&game_class())?;
	let second = write(&read(first.clone())?)?;
	assert_eq!(first, second);
	Ok(())
}

#[test]
fn edited_code_is_reencoded() -> Result<()> {
	let mut class = read(write(&game_class())?)?;

	let code = class.method_mut("run", "()V")
		.and_then(|method| method.code.as_mut())
		.ok_or_else(|| anyhow::anyhow!("no code for run"))?;
	let list = code.instructions_mut();
	let ids = list.ids();
	list.remove(ids[0])?;
	list.set(ids[1], Instruction::Invoke(Invoke::new(InvokeKind::Static, MethodRef::new("a/TimeHelper", "updateDisplay", "()V"))))?;
	list.set(ids[2], Instruction::GetStatic(FieldRef::new("a/TimeHelper", "serverTickLength", "J")))?;
	assert!(code.is_modified());

	let read = read(write(&class)?)?;
	assert_eq!(instructions(&read, "run"), vec![
		Instruction::Invoke(Invoke::new(InvokeKind::Static, MethodRef::new("a/TimeHelper", "updateDisplay", "()V"))),
		Instruction::GetStatic(FieldRef::new("a/TimeHelper", "serverTickLength", "J")),
		Instruction::LStore(LvIndex { index: 1 }),
		Instruction::Return,
	]);
	let run = read.method("run", "()V").and_then(|method| method.code.as_ref());
	assert_eq!(run.map(|code| (code.max_stack(), code.max_locals())), Some((2, 3)));

	// the constructor wasn't touched
	assert_eq!(instructions(&read, "<init>"), instructions(&game_class(), "<init>"));
	Ok(())
}

#[test]
fn exception_tables_follow_their_instructions() -> Result<()> {
	let mut list = InstructionList::new();
	let start = list.new_label();
	let end = list.new_label();
	let handler = list.new_label();
	let after = list.new_label();

	let tick = list.push_back(Instruction::Invoke(Invoke::new(InvokeKind::Static, MethodRef::new("java/lang/Thread", "sleep", "()V"))));
	let goto = list.push_back(Instruction::Goto(after));
	let pop = list.push_back(Instruction::Pop);
	let ret = list.push_back(Instruction::Return);
	list.bind_label(start, tick)?;
	list.bind_label(end, goto)?;
	list.bind_label(handler, pop)?;
	list.bind_label(after, ret)?;

	let mut code = Code::new(list);
	code.exception_table_mut().push(Exception {
		start,
		end,
		handler,
		catch: Some("java/lang/InterruptedException".to_owned()),
	});
	let mut method = Method::new(access::PUBLIC | access::STATIC, "sleep", "()V");
	method.code = Some(code);
	let mut class = ClassFile::new(Version::V17, access::PUBLIC, "a/Sleeper", Some("java/lang/Object".to_owned()));
	class.methods.push(method);

	let read = read(write(&class)?)?;
	let code = read.method("sleep", "()V").and_then(|method| method.code.as_ref())
		.ok_or_else(|| anyhow::anyhow!("no code for sleep"))?;
	let list = code.instructions();

	assert_eq!(code.exception_table().len(), 1);
	let exception = &code.exception_table()[0];
	assert_eq!(position(list, exception.start), Some(0));
	assert_eq!(position(list, exception.end), Some(1));
	assert_eq!(position(list, exception.handler), Some(2));
	assert_eq!(exception.catch.as_deref(), Some("java/lang/InterruptedException"));

	let goto_target = list.iter().find_map(|(_, instruction)| match instruction {
		&Instruction::Goto(label) => Some(label),
		_ => None,
	});
	assert_eq!(goto_target.and_then(|label| position(list, label)), Some(3));
	assert_eq!(code.max_stack(), 1);
	Ok(())
}

#[test]
fn failures_name_the_method() {
	let mut list = InstructionList::new();
	list.push_back(Instruction::Return);
	// unreachable
	list.push_back(Instruction::Nop);
	let mut method = Method::new(access::PUBLIC | access::STATIC, "broken", "()V");
	method.code = Some(Code::new(list));
	let mut class = ClassFile::new(Version::V1_8, access::PUBLIC, "a/Broken", Some("java/lang/Object".to_owned()));
	class.methods.push(method);

	let error = write(&class).err().map(|error| format!("{error:#}")).unwrap_or_default();
	assert!(error.contains("\"broken\""), "{error}");
	assert!(error.contains("a/Broken"), "{error}");
}
