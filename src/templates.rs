use minijinja::{AutoEscape, Environment};
use serde::Serialize;

/// Renders `source` as the template `name`. Every interpolated value is
/// HTML-escaped unless the template marks it `|safe`.
pub fn render_html<S: Serialize>(
    name: &str,
    source: &str,
    ctx: S,
) -> Result<String, minijinja::Error> {
    let mut env = Environment::new();
    env.set_auto_escape_callback(|_| AutoEscape::Html);
    env.add_template(name, source)?;
    let tmpl = env.get_template(name)?;
    tmpl.render(ctx)
}
