use super::Document;

/// Render a document in canonical form.
///
/// Single-valued metadata first, then LINK/CONTACT/FOLLOW lines, then the
/// `* Posts` section. Every post gets a bare `**` marker and a drawer with
/// `:ID:` first and the remaining properties in key order.
pub(crate) fn render(doc: &Document) -> String {
    let meta = &doc.metadata;
    let mut out = String::new();

    let single = [
        ("TITLE", &meta.title),
        ("NICK", &meta.nick),
        ("DESCRIPTION", &meta.description),
        ("AVATAR", &meta.avatar),
        ("LOCATION", &meta.location),
        ("BIRTHDAY", &meta.birthday),
        ("LANGUAGE", &meta.language),
        ("PINNED", &meta.pinned),
    ];
    for (key, value) in single {
        if !value.is_empty() {
            out.push_str(&format!("#+{}: {}\n", key, value));
        }
    }
    for link in &meta.links {
        out.push_str(&format!("#+LINK: {}\n", link));
    }
    for contact in &meta.contacts {
        out.push_str(&format!("#+CONTACT: {}\n", contact));
    }
    for follow in &meta.follows {
        match &follow.nickname {
            Some(nick) => out.push_str(&format!("#+FOLLOW: {} {}\n", nick, follow.url)),
            None => out.push_str(&format!("#+FOLLOW: {}\n", follow.url)),
        }
    }

    out.push_str("\n* Posts\n");
    for post in &doc.posts {
        out.push_str("**\n:PROPERTIES:\n");
        out.push_str(&format!(":ID: {}\n", post.id));
        for (key, value) in post.properties.iter().filter(|(k, _)| k.as_str() != "id") {
            out.push_str(&format!(":{}: {}\n", key.to_uppercase(), value));
        }
        out.push_str(":END:\n");
        if !post.content.is_empty() {
            out.push('\n');
            out.push_str(&post.content);
            out.push('\n');
        }
        out.push('\n');
    }

    out
}
