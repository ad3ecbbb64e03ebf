use turnosplus_server::auth::hash_password;

// Prints an Argon2 PHC string for seeding app_user rows (e.g. the first
// admin account) by hand.
fn main() {
    let password = std::env::args().nth(1).expect("Usage: hashpass <password>");
    let phc = hash_password(&password).expect("hashing failed");
    println!("{phc}");
}
