//! 用户相关的 API 接口

use super::{ApiCaller, ApiError, ApiResult};
use serde_json::Value;

impl ApiCaller {
    /// 调用 `user/get_action_token` 获取上传动作令牌
    ///
    /// 令牌授权上传接口，服务端有效期二十四小时，
    /// 调用方应当在过期前主动更换。
    pub async fn get_upload_action_token(&self) -> ApiResult<String> {
        let response = self
            .call("/api/user/get_action_token.php", &[("type", "upload")])
            .await?;
        response
            .get("action_token")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| ApiError::ContentInvalidData("missing action_token".to_owned()))
    }
}
