pub mod check;

use darkness::Tunables;

// EVERY KEY WITH ITS DEFAULT AND VALID RANGE
pub fn run_tunables(possible: usize) {
    let tunables = Tunables::new(possible);
    println!("{:<24} {:<10} {}", "KEY", "DEFAULT", "RANGE");
    println!("{}", "-".repeat(60));
    for key in tunables.keys() {
        println!("{:<24} {:<10} {}", key.name(), tunables.show(key), key.range());
    }
}
