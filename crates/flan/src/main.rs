use flan_vm::vm::Vm;

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let mut image_path: Option<String> = None;
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-v" | "--version" => {
                let [major, minor, patch] = flan_vm::image::VERSION;
                println!("Flan {major}.{minor}.{patch}");
                return;
            }
            arg if arg.starts_with('-') => {
                eprintln!("flan: unrecognized option '{arg}'");
                std::process::exit(1);
            }
            arg => {
                if image_path.is_some() {
                    eprintln!("flan: expected a single image file");
                    std::process::exit(1);
                }
                image_path = Some(arg.to_string());
            }
        }
        i += 1;
    }

    let path = match image_path {
        Some(p) => p,
        None => {
            eprintln!("usage: flan <image>");
            std::process::exit(1);
        }
    };

    let image = match std::fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("flan: cannot open {path}: {e}");
            std::process::exit(1);
        }
    };

    let mut vm = match Vm::load(&image) {
        Ok(vm) => vm,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = vm.run() {
        eprint!("{}", vm.render_error(&e));
        std::process::exit(1);
    }
}
