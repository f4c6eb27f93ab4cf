//! The registered tasks. Their names are what the command line accepts.

use std::sync::{Arc, Mutex};

use anyhow::anyhow;

use crate::bundler::{self, IncrementalBundler};
use crate::core::{Environment, Profile};
use crate::engine::{Blueprint, TaskGraph};
use crate::error::ConfigError;
use crate::lint::{ScriptLint, lint_files};
use crate::loader::{AssetPipeline, Markup, StaticKind, Statics, Styles, Templates, styles};
use crate::utils::clear_dist;

/// The development bundler, shared by `js:dev` and the watch mode script
/// worker so both work on the same module graph.
pub type SharedBundler = Arc<Mutex<IncrementalBundler>>;

pub struct Tasks {
    pub graph: Arc<TaskGraph<Environment>>,
    pub scripts: SharedBundler,
}

fn pipeline<P>(blueprint: &mut Blueprint<Environment>, name: &str, after: &[&str], pipeline: P)
where
    P: AssetPipeline + 'static,
{
    blueprint
        .task(name)
        .after(after.iter().copied())
        .run(move |env: &Environment| {
            pipeline.run(env)?;
            Ok(())
        });
}

/// Declares every task and validates the resulting graph.
pub fn register(env: &Environment) -> Result<Tasks, ConfigError> {
    let scripts: SharedBundler = Arc::new(Mutex::new(IncrementalBundler::new(env)));
    let mut blueprint = Blueprint::new();

    blueprint.task("clean").run(|env: &Environment| {
        clear_dist(&env.config.path(&env.config.dist))?;
        Ok(())
    });

    blueprint.task("lint:css").run(|env: &Environment| {
        styles::lint(env)?;
        Ok(())
    });

    let dev = Styles {
        profile: Profile::Development,
    };
    let prod = Styles {
        profile: Profile::Production,
    };
    pipeline(&mut blueprint, "css:dev", &["lint:css"], dev);
    pipeline(&mut blueprint, "css:prod", &["lint:css"], prod);

    blueprint.task("lint:js").run(|env: &Environment| {
        lint_files(&ScriptLint, &bundler::sources(env)?)?;
        Ok(())
    });

    let shared = scripts.clone();
    blueprint.task("js:dev").run(move |env: &Environment| {
        let mut guard = shared
            .lock()
            .map_err(|_| anyhow!("script bundler lock poisoned"))?;
        bundler::rebuild_dev(env, &mut guard)?;
        Ok(())
    });

    blueprint
        .task("js:prod")
        .after(["lint:js"])
        .run(|env: &Environment| {
            bundler::release(env)?;
            Ok(())
        });

    let dev = Markup {
        profile: Profile::Development,
    };
    let prod = Markup {
        profile: Profile::Production,
    };
    pipeline(&mut blueprint, "html:dev", &[], dev);
    pipeline(&mut blueprint, "html:prod", &[], prod);
    pipeline(&mut blueprint, "templates", &[], Templates);
    pipeline(
        &mut blueprint,
        "images",
        &[],
        Statics {
            kind: StaticKind::Images,
        },
    );
    pipeline(
        &mut blueprint,
        "fonts",
        &[],
        Statics {
            kind: StaticKind::Fonts,
        },
    );

    blueprint
        .task("build:dev")
        .after(["html:dev", "templates", "js:dev", "css:dev", "images", "fonts"])
        .group();
    blueprint
        .task("build:prod")
        .after(["html:prod", "templates", "js:prod", "css:prod", "images", "fonts"])
        .group();
    blueprint.task("prod").after(["clean", "build:prod"]).group();
    blueprint.task("default").after(["clean", "build:dev"]).group();

    Ok(Tasks {
        graph: Arc::new(blueprint.finish()?),
        scripts,
    })
}
