//! Server-rendered pages, compiled into the binary.

/// User as shown on a page. Built at the call site, never persisted.
pub struct PageUser {
    pub username: String,
}

pub fn home(title: &str, user: &PageUser) -> String {
    let body = format!("        <h1>Hello, {}!</h1>", user.username);
    base(title, &body)
}

fn base(title: &str, body: &str) -> String {
    format!(
        "<html>\n    <head>\n        <title>{title} - Microblog</title>\n    </head>\n    <body>\n{body}\n    </body>\n</html>"
    )
}
