//! Built-in namespace handlers
//!
//! The `beans` handler reads `<bean>` and `<alias>` entries:
//!
//! ```xml
//! <beans xmlns="urn:hypha:beans">
//!     <bean id="store" class="app.Store" scope="singleton">
//!         <property name="path" value="/var/lib/app"/>
//!         <property name="mode">strict</property>
//!     </bean>
//!     <alias name="store" alias="defaultStore"/>
//! </beans>
//! ```

use crate::error::{ConfigError, Result};
use crate::namespace::NamespaceHandler;
use crate::reader::{Element, ParseContext};
use crate::resource::Definition;

/// Namespace the built-in descriptor binds [`BeansHandler`] to
pub const BEANS_NAMESPACE: &str = "urn:hypha:beans";

#[derive(Debug, Clone, Copy, Default)]
pub struct BeansHandler;

impl BeansHandler {
    pub fn new() -> Self {
        Self
    }

    fn parse_bean(&self, ctx: &mut ParseContext<'_>, element: &Element) -> Result<()> {
        let id = element.attr("id").filter(|id| !id.is_empty()).ok_or_else(|| {
            ConfigError::invalid_definition(ctx.source_label(), "<bean> requires a non-empty 'id'")
        })?;

        let mut definition = Definition::new(id, "bean", element.namespace());
        for attr in element.attributes().iter().filter(|a| a.namespace.is_empty()) {
            match attr.name.as_str() {
                "id" => {}
                "class" => definition.class = Some(attr.value.clone()),
                other => {
                    definition.attributes.insert(other.to_string(), attr.value.clone());
                }
            }
        }

        for child in element.children_in(element.namespace()) {
            if child.name() != "property" {
                return Err(ConfigError::invalid_definition(
                    ctx.source_label(),
                    format!("unexpected <{}> inside <bean id=\"{}\">", child.name(), id),
                ));
            }
            let name = child.attr("name").ok_or_else(|| {
                ConfigError::invalid_definition(
                    ctx.source_label(),
                    format!("<property> in bean '{}' requires 'name'", id),
                )
            })?;
            let value = child.attr("value").unwrap_or_else(|| child.text());
            definition.properties.insert(name.to_string(), value.to_string());
        }

        ctx.define(definition);
        Ok(())
    }

    fn parse_alias(&self, ctx: &mut ParseContext<'_>, element: &Element) -> Result<()> {
        match (element.attr("name"), element.attr("alias")) {
            (Some(target), Some(alias)) if !alias.is_empty() => {
                ctx.define(Definition::new(alias, "alias", element.namespace()).with_attribute("target", target));
                Ok(())
            }
            _ => Err(ConfigError::invalid_definition(
                ctx.source_label(),
                "<alias> requires 'name' and 'alias'",
            )),
        }
    }

    fn parse_entry(&self, ctx: &mut ParseContext<'_>, element: &Element) -> Result<()> {
        match element.name() {
            "bean" => self.parse_bean(ctx, element),
            "alias" => self.parse_alias(ctx, element),
            other => Err(ConfigError::invalid_definition(
                ctx.source_label(),
                format!("unknown element <{}> in namespace '{}'", other, element.namespace()),
            )),
        }
    }
}

impl NamespaceHandler for BeansHandler {
    fn parse_element(&self, ctx: &mut ParseContext<'_>, element: &Element) -> Result<()> {
        if element.name() == "beans" {
            for child in element.children_in(element.namespace()) {
                self.parse_entry(ctx, child)?;
            }
            Ok(())
        } else {
            self.parse_entry(ctx, element)
        }
    }
}
